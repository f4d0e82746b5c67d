//! Replica-set bootstrap state machine.
//!
//! One invocation drives the node from whatever state the live service
//! reports to the correct membership state, issuing at most one of
//! {initiate, reconfig, nothing}.  There are no automatic retries: a
//! failed mutation is a human-in-the-loop condition, and rerunning the
//! tool is safe because every path starts from a fresh status probe.
//!
//! Connection policy: the canonical domain is tried first; on failure,
//! exactly one fallback via the loopback address (DNS may not resolve yet
//! right after provisioning).  Whichever target answers is used only for
//! *talking* to the node -- membership entries are always written with the
//! canonical domain, never a loopback address, because loopback is
//! unreachable from the other members.

pub mod intent;

use tracing::{debug, info, warn};

use crate::admin::client::{
    AdminClient, ConnectTarget, CreateUserOutcome, MemberSpec, ReplSetMember, ReplSetProbe,
    UserSpec,
};
use crate::config::{Config, NodeRole};
use crate::errors::ReplicadmError;

/// Loopback address used for the single connection fallback.
const LOOPBACK_FALLBACK: &str = "127.0.0.1";

/// What one bootstrap invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A new replica set was initiated with this node as sole member.
    Initiated,
    /// Membership was rewritten to remove loopback entries.
    Reconfigured { replaced: usize },
    /// Nothing to do; membership already correct.
    AlreadyInDesiredState,
    /// Secondary node waiting to be added from the primary.
    AwaitingEnrollment,
}

/// Brings a node to its correct replica-set membership state.
pub struct ClusterBootstrapper<'a> {
    admin: &'a dyn AdminClient,
    config: &'a Config,
    replica_set_name: String,
}

impl<'a> ClusterBootstrapper<'a> {
    pub fn new(admin: &'a dyn AdminClient, config: &'a Config, replica_set_name: String) -> Self {
        Self {
            admin,
            config,
            replica_set_name,
        }
    }

    /// The `hostname:port` this node must appear as in membership state.
    fn canonical_member_host(&self) -> String {
        format!(
            "{}:{}",
            self.config.node.domain, self.config.mongod.listen_port
        )
    }

    /// Run one bootstrap pass.
    pub async fn run(&self) -> Result<BootstrapOutcome, ReplicadmError> {
        if self.config.node.domain.is_empty() {
            return Err(ReplicadmError::InvalidNodeConfig {
                detail: "node.domain must be set; membership entries are written with the \
                         canonical domain"
                    .to_string(),
            });
        }

        let target = self.connect().await?;
        let probe = self
            .admin
            .repl_set_status(&target)
            .await
            .map_err(|e| ReplicadmError::AdminCommand {
                detail: format!("rs.status() via {target}: {e}"),
            })?;
        debug!(?probe, "replica-set probe");

        match (self.config.node.role, probe) {
            (NodeRole::Primary, ReplSetProbe::Uninitialized) => self.initiate(&target).await,
            (NodeRole::Primary, ReplSetProbe::Member {
                set_name,
                is_primary,
                members,
            }) => {
                self.reconfigure(&target, &set_name, is_primary, &members)
                    .await
            }
            (NodeRole::Secondary, ReplSetProbe::Uninitialized) => {
                info!(
                    "node is a secondary and not yet enrolled; on the primary, run: \
                     rs.add(\"{}\")",
                    self.canonical_member_host()
                );
                Ok(BootstrapOutcome::AwaitingEnrollment)
            }
            (NodeRole::Secondary, ReplSetProbe::Member { set_name, .. }) => {
                info!(set = %set_name, "node is an enrolled member; nothing to do");
                Ok(BootstrapOutcome::AlreadyInDesiredState)
            }
        }
    }

    /// Pick the connection target: canonical domain, then one loopback
    /// fallback, then give up.
    async fn connect(&self) -> Result<ConnectTarget, ReplicadmError> {
        let port = self.config.mongod.listen_port;
        let domain_target = ConnectTarget::new(self.config.node.domain.clone(), port);
        let domain_err = match self.admin.ping(&domain_target).await {
            Ok(()) => return Ok(domain_target),
            Err(e) => e,
        };

        let fallback = ConnectTarget::new(LOOPBACK_FALLBACK, port);
        warn!(
            domain = %domain_target,
            error = %domain_err,
            "canonical domain unreachable; trying loopback fallback"
        );
        match self.admin.ping(&fallback).await {
            Ok(()) => Ok(fallback),
            Err(fallback_err) => Err(ReplicadmError::Unreachable {
                domain: domain_target.to_string(),
                fallback: fallback.to_string(),
                detail: format!("{domain_err}; fallback: {fallback_err}"),
            }),
        }
    }

    /// One-shot initiate, seeding the set with this node under its
    /// canonical domain.
    async fn initiate(&self, target: &ConnectTarget) -> Result<BootstrapOutcome, ReplicadmError> {
        let member = MemberSpec {
            id: 0,
            host: self.canonical_member_host(),
        };
        info!(
            set = %self.replica_set_name,
            member = %member.host,
            "initiating replica set"
        );
        self.admin
            .initiate(target, &self.replica_set_name, &[member])
            .await
            .map_err(|e| ReplicadmError::InitiateFailed {
                detail: e.to_string(),
            })?;
        self.ensure_admin_user(target).await?;
        Ok(BootstrapOutcome::Initiated)
    }

    /// Reconfig-or-noop path for an already-initiated primary.
    async fn reconfigure(
        &self,
        target: &ConnectTarget,
        live_set_name: &str,
        is_primary: bool,
        members: &[ReplSetMember],
    ) -> Result<BootstrapOutcome, ReplicadmError> {
        if live_set_name != self.replica_set_name {
            // Renaming a live set requires a full re-initialization; report
            // only.
            warn!(
                live = %live_set_name,
                desired = %self.replica_set_name,
                "live replica-set name differs from the configured one"
            );
        }

        let intent = intent::compute(
            members,
            &self.config.node.domain,
            self.config.mongod.listen_port,
        );
        if intent.is_noop() {
            info!(set = %live_set_name, "membership already correct");
            if is_primary {
                self.ensure_admin_user(target).await?;
            }
            return Ok(BootstrapOutcome::AlreadyInDesiredState);
        }

        if !is_primary {
            return Err(ReplicadmError::ReconfigFailed {
                detail: format!(
                    "membership contains {} loopback entr{} but this node is not currently \
                     primary; fix membership from the primary and rerun",
                    intent.replaced,
                    if intent.replaced == 1 { "y" } else { "ies" }
                ),
            });
        }

        info!(
            replaced = intent.replaced,
            "rewriting loopback membership entries to the canonical domain"
        );
        self.admin
            .reconfig(target, &intent.members)
            .await
            .map_err(|e| ReplicadmError::ReconfigFailed {
                detail: e.to_string(),
            })?;
        self.ensure_admin_user(target).await?;
        Ok(BootstrapOutcome::Reconfigured {
            replaced: intent.replaced,
        })
    }

    /// Provision the configured admin user on the primary.  A user that
    /// already exists is the desired state, not a failure.
    async fn ensure_admin_user(&self, target: &ConnectTarget) -> Result<(), ReplicadmError> {
        let Some(admin_user) = &self.config.admin_user else {
            return Ok(());
        };
        let spec = UserSpec {
            name: admin_user.username.clone(),
            password: admin_user.password.clone(),
            roles: admin_user.roles.clone(),
        };
        match self.admin.create_user(target, &spec).await {
            Ok(CreateUserOutcome::Created) => {
                info!(user = %spec.name, "admin user created");
                Ok(())
            }
            Ok(CreateUserOutcome::AlreadyExists) => {
                debug!(user = %spec.name, "admin user already exists");
                Ok(())
            }
            Err(e) => Err(ReplicadmError::AdminCommand {
                detail: format!("createUser {}: {e}", spec.name),
            }),
        }
    }
}
