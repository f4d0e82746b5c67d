//! Error taxonomy for reconciliation and bootstrap.
//!
//! Every variant maps to a stable string code and a process exit code so
//! operators (and wrapping automation) can branch on outcomes without
//! parsing log text.  "Already in desired state" is deliberately *not* a
//! variant: a no-op is reported through [`crate::reconcile::ReconcileResult`]
//! and [`crate::bootstrap::BootstrapOutcome`], never as a failure.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the reconciler and bootstrapper.
#[derive(Debug, Error)]
pub enum ReplicadmError {
    /// TLS was requested but the certificate material is missing or unreadable.
    #[error("TLS mode requires certificate material, but {path} is missing or unreadable")]
    MissingCertificate { path: PathBuf },

    /// The service did not come back after a config write; the previous
    /// config was restored successfully.
    #[error("service '{service}' failed to restart within {waited_secs}s after config write")]
    RestartFailed { service: String, waited_secs: u64 },

    /// The rollback itself failed, either restoring the backup or
    /// restarting on it.  Fatal: the node needs an operator.
    #[error(
        "service '{service}' is down and rolling back to {backup} did not recover it; \
         manual intervention required"
    )]
    Unrecoverable { service: String, backup: String },

    /// The one-shot replica-set initiate was rejected by the server.
    #[error("replica set initiate failed: {detail}")]
    InitiateFailed { detail: String },

    /// The replica-set reconfig was rejected by the server.
    #[error("replica set reconfig failed: {detail}")]
    ReconfigFailed { detail: String },

    /// Neither the canonical domain nor the loopback fallback answered.
    #[error("cannot reach mongod via '{domain}' or '{fallback}': {detail}")]
    Unreachable {
        domain: String,
        fallback: String,
        detail: String,
    },

    /// The tool's own configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The node section is incomplete or inconsistent for the requested
    /// operation.
    #[error("invalid node configuration: {detail}")]
    InvalidNodeConfig { detail: String },

    /// An administrative command produced output we could not interpret.
    #[error("unexpected output from administrative command: {detail}")]
    AdminCommand { detail: String },

    /// Filesystem failure while reading/writing the config or its backups.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReplicadmError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicadmError::MissingCertificate { .. } => "MissingCertificate",
            ReplicadmError::RestartFailed { .. } => "RestartFailed",
            ReplicadmError::Unrecoverable { .. } => "Unrecoverable",
            ReplicadmError::InitiateFailed { .. } => "InitiateFailed",
            ReplicadmError::ReconfigFailed { .. } => "ReconfigFailed",
            ReplicadmError::Unreachable { .. } => "Unreachable",
            ReplicadmError::ConfigParse(_) => "ConfigParse",
            ReplicadmError::InvalidNodeConfig { .. } => "InvalidNodeConfig",
            ReplicadmError::AdminCommand { .. } => "AdminCommand",
            ReplicadmError::Io { .. } => "Io",
        }
    }

    /// Process exit code reported by the CLI when this error is terminal.
    ///
    /// `Unrecoverable` gets its own code so monitoring can page on it
    /// specifically; everything else shares a generic failure code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReplicadmError::Unrecoverable { .. } => 3,
            ReplicadmError::MissingCertificate { .. } => 2,
            _ => 1,
        }
    }

    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReplicadmError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        let err = ReplicadmError::RestartFailed {
            service: "mongod".to_string(),
            waited_secs: 15,
        };
        assert_eq!(err.kind(), "RestartFailed");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_unrecoverable_has_distinct_exit_code() {
        let err = ReplicadmError::Unrecoverable {
            service: "mongod".to_string(),
            backup: "/etc/mongod.conf.bak.20260825120000".to_string(),
        };
        assert_eq!(err.exit_code(), 3);
        let missing = ReplicadmError::MissingCertificate {
            path: PathBuf::from("/etc/ssl/mongo.pem"),
        };
        assert_ne!(err.exit_code(), missing.exit_code());
    }
}
