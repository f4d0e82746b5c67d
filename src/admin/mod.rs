//! Database administrative-client collaborators.
//!
//! The bootstrapper talks to the running mongod through the
//! [`client::AdminClient`] trait; production drives `mongosh`, tests use
//! the recording in-memory double.

pub mod client;
pub mod memory;
pub mod mongosh;
