//! Abstract administrative-client trait and the replica-set types it
//! exchanges.
//!
//! The contract mirrors what the bootstrapper needs and nothing more:
//! ping, read replica-set status, initiate, reconfig, create a user.
//! Implementations connect to one explicit target per call; target
//! selection (canonical domain first, one loopback fallback) belongs to
//! the bootstrapper, not the client.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// One host/port the client connects to for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One member entry in a replica-set configuration, as submitted to
/// initiate/reconfig.  `host` is the full `hostname:port` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    /// Ordinal member id (`_id` in the server's config document).
    pub id: u32,
    pub host: String,
}

/// One member as reported by the live replica-set status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplSetMember {
    pub id: u32,
    /// `hostname:port` form.
    pub host: String,
    /// Whether this entry is the node being queried.
    pub is_self: bool,
}

/// What the live service reports about its replica-set state.
///
/// Derived fresh on every bootstrap invocation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplSetProbe {
    /// No replica set has been initiated on this node.
    Uninitialized,
    /// The node is a member of an initiated replica set.
    Member {
        set_name: String,
        is_primary: bool,
        members: Vec<ReplSetMember>,
    },
}

/// Administrative user to provision.
#[derive(Debug, Clone)]
pub struct UserSpec {
    pub name: String,
    pub password: String,
    pub roles: Vec<String>,
}

/// Result of a create-user call.  A user that already exists is a normal
/// answer, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created,
    AlreadyExists,
}

/// Administrative client contract.
pub trait AdminClient: Send + Sync {
    /// Liveness check against one target.
    fn ping(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Read the replica-set status of the target node.
    fn repl_set_status(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReplSetProbe>> + Send + '_>>;

    /// Initiate a new replica set seeded with `members`.
    fn initiate(
        &self,
        target: &ConnectTarget,
        set_name: &str,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Replace the membership list of an initiated replica set.
    fn reconfig(
        &self,
        target: &ConnectTarget,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Create a user in the admin database.
    fn create_user(
        &self,
        target: &ConnectTarget,
        user: &UserSpec,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CreateUserOutcome>> + Send + '_>>;
}
