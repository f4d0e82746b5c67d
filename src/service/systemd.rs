//! systemd service manager.
//!
//! Drives `systemctl` through `tokio::process`.  Command failures carry
//! the captured stderr so the operator sees what systemd saw.

use std::future::Future;
use std::pin::Pin;

use tokio::process::Command;
use tracing::debug;

use super::manager::ServiceManager;

/// Manages services via `systemctl`.
pub struct SystemdManager {
    /// Binary to invoke, overridable for non-standard installs.
    systemctl: String,
}

impl SystemdManager {
    pub fn new() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
        }
    }

    async fn run(&self, verb: &str, service: &str) -> anyhow::Result<std::process::Output> {
        debug!(%verb, %service, "invoking systemctl");
        let output = Command::new(&self.systemctl)
            .arg(verb)
            .arg(service)
            .output()
            .await?;
        Ok(output)
    }

    async fn run_checked(&self, verb: &str, service: &str) -> anyhow::Result<()> {
        let output = self.run(verb, service).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "systemctl {verb} {service} exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl Default for SystemdManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for SystemdManager {
    fn restart(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move { self.run_checked("restart", &service).await })
    }

    fn stop(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move { self.run_checked("stop", &service).await })
    }

    fn is_active(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move {
            // `systemctl is-active` exits 0 iff the unit is active; a
            // non-zero exit is a normal "inactive" answer, not a failure.
            let output = self.run("is-active", &service).await?;
            Ok(output.status.success())
        })
    }
}
