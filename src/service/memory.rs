//! In-memory service manager for tests.
//!
//! Restart outcomes and liveness answers are scripted: each queued `bool`
//! is the active state the service lands in after the next restart
//! (default: comes up fine), or the answer to the next `is_active` query.
//! Every call is recorded so tests can assert on exactly what the
//! reconciler asked the manager to do.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::manager::ServiceManager;

#[derive(Debug, Default)]
struct Inner {
    active: bool,
    restart_outcomes: VecDeque<bool>,
    active_samples: VecDeque<bool>,
    calls: Vec<String>,
}

/// Scripted service-manager double.
#[derive(Debug, Default)]
pub struct MemoryServiceManager {
    inner: Mutex<Inner>,
}

impl MemoryServiceManager {
    /// A manager whose service starts out inactive and comes up on restart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the post-restart active state for upcoming restarts, in order.
    pub fn push_restart_outcome(&self, comes_up: bool) {
        self.inner.lock().unwrap().restart_outcomes.push_back(comes_up);
    }

    /// Script the answers to upcoming `is_active` queries, in order.  A
    /// consumed sample also becomes the new current state; once the queue
    /// is exhausted, queries fall back to that state.
    pub fn push_active_sample(&self, active: bool) {
        self.inner.lock().unwrap().active_samples.push_back(active);
    }

    /// Force the current active state.
    pub fn set_active(&self, active: bool) {
        self.inner.lock().unwrap().active = active;
    }

    /// Every call made so far, e.g. `"restart mongod"`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of restarts requested so far.
    pub fn restart_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with("restart "))
            .count()
    }
}

impl ServiceManager for MemoryServiceManager {
    fn restart(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("restart {service}"));
            inner.active = inner.restart_outcomes.pop_front().unwrap_or(true);
            Ok(())
        })
    }

    fn stop(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("stop {service}"));
            inner.active = false;
            Ok(())
        })
    }

    fn is_active(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let service = service.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(format!("is-active {service}"));
            if let Some(sample) = inner.active_samples.pop_front() {
                inner.active = sample;
            }
            Ok(inner.active)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_restart_outcomes() {
        let manager = MemoryServiceManager::new();
        manager.push_restart_outcome(false);
        manager.push_restart_outcome(true);

        manager.restart("mongod").await.unwrap();
        assert!(!manager.is_active("mongod").await.unwrap());

        manager.restart("mongod").await.unwrap();
        assert!(manager.is_active("mongod").await.unwrap());

        // Unscripted restarts default to coming up.
        manager.restart("mongod").await.unwrap();
        assert!(manager.is_active("mongod").await.unwrap());
        assert_eq!(manager.restart_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_active_samples_then_fall_back_to_state() {
        let manager = MemoryServiceManager::new();
        manager.push_active_sample(false);
        manager.push_active_sample(true);

        assert!(!manager.is_active("mongod").await.unwrap());
        assert!(manager.is_active("mongod").await.unwrap());
        // Queue drained: the last sample persists as the current state.
        assert!(manager.is_active("mongod").await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_deactivates() {
        let manager = MemoryServiceManager::new();
        manager.set_active(true);
        manager.stop("mongod").await.unwrap();
        assert!(!manager.is_active("mongod").await.unwrap());
        assert_eq!(
            manager.calls()[..2],
            ["stop mongod".to_string(), "is-active mongod".to_string()]
        );
    }
}
