//! Abstract service-manager trait.
//!
//! The contract the reconciler relies on: restart and stop a named unit,
//! and report whether it is currently active.  A restart call returning
//! `Ok` only means the manager accepted the request; liveness is confirmed
//! separately by polling [`ServiceManager::is_active`].

use std::future::Future;
use std::pin::Pin;

/// Process/service manager contract.
pub trait ServiceManager: Send + Sync {
    /// Restart the named service.
    fn restart(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Stop the named service.
    fn stop(&self, service: &str)
        -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Whether the named service is currently active.
    fn is_active(
        &self,
        service: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}
