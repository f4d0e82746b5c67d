//! Service-manager collaborators.
//!
//! The reconciler restarts mongod through the [`manager::ServiceManager`]
//! trait; production uses systemd, tests use the scripted in-memory double.

pub mod manager;
pub mod memory;
pub mod systemd;
