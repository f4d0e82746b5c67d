//! replicadm library -- MongoDB replica-set configuration reconciler and
//! bootstrap engine.
//!
//! Two cooperating components: the [`reconcile::ConfigReconciler`] brings
//! the on-disk mongod configuration to the desired state (backup before
//! every write, rollback on a failed restart), and the
//! [`bootstrap::ClusterBootstrapper`] brings the node to its correct
//! replica-set membership state (at most one initiate or reconfig per
//! invocation).  External systems -- systemd and the mongod administrative
//! interface -- are reached through the traits in [`service`] and
//! [`admin`], with in-memory doubles for tests.

pub mod admin;
pub mod backup;
pub mod bootstrap;
pub mod config;
pub mod document;
pub mod errors;
pub mod reconcile;
pub mod service;
