//! Configuration loading and types for replicadm.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `mongod` section is the desired state the
//! reconciler drives the on-disk mongod configuration toward; `node` and
//! `service` carry the operational context (role, canonical domain,
//! service name) that earlier incarnations of this tool passed around
//! through marker files.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ReplicadmError;

/// Replica-set name used when neither the CLI nor the config file names one.
pub const DEFAULT_REPLICA_SET: &str = "rs0";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Desired mongod settings.
    #[serde(default)]
    pub mongod: DesiredConfig,

    /// This node's role and canonical domain.
    #[serde(default)]
    pub node: NodeConfig,

    /// Service-manager settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Administrative user provisioned on the primary after initiate.
    #[serde(default)]
    pub admin_user: Option<AdminUserConfig>,
}

/// Desired mongod configuration.
///
/// Consumed read-only by the reconciler; one instance per invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct DesiredConfig {
    /// Port mongod listens on.
    #[serde(default = "default_port")]
    pub listen_port: u16,

    /// Bind address written to `net.bindIp`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Whether `security.authorization` is enabled.
    #[serde(default = "default_true")]
    pub auth_enabled: bool,

    /// TLS mode for client connections.
    #[serde(default)]
    pub tls_mode: TlsMode,

    /// Combined certificate + private key PEM (`net.tls.certificateKeyFile`).
    #[serde(default)]
    pub certificate_key_file: Option<PathBuf>,

    /// CA bundle (`net.tls.CAFile`).
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Optional inter-node x509 certificate (`net.tls.clusterFile`).
    /// When set, `security.clusterAuthMode: x509` is written as well.
    #[serde(default)]
    pub cluster_file: Option<PathBuf>,

    /// Replica set name.  Subject to the precedence rule in
    /// [`Config::effective_replica_set_name`].
    #[serde(default)]
    pub replica_set_name: Option<String>,

    /// Data directory, written only when synthesizing a config from scratch.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log file path, written only when synthesizing a config from scratch.
    #[serde(default = "default_log_path")]
    pub log_path: String,
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            listen_port: default_port(),
            bind_address: default_bind_address(),
            auth_enabled: default_true(),
            tls_mode: TlsMode::default(),
            certificate_key_file: None,
            ca_file: None,
            cluster_file: None,
            replica_set_name: None,
            db_path: default_db_path(),
            log_path: default_log_path(),
        }
    }
}

impl DesiredConfig {
    /// Enforce the TLS-material invariant: any TLS mode other than `off`
    /// requires both the certificate-key file and the CA file to exist and
    /// be readable.  No mutation is attempted when this fails.
    pub fn validate(&self) -> Result<(), ReplicadmError> {
        if self.tls_mode == TlsMode::Off {
            return Ok(());
        }
        let cert = self
            .certificate_key_file
            .as_deref()
            .ok_or(ReplicadmError::MissingCertificate {
                path: PathBuf::from("(certificate_key_file unset)"),
            })?;
        let ca = self
            .ca_file
            .as_deref()
            .ok_or(ReplicadmError::MissingCertificate {
                path: PathBuf::from("(ca_file unset)"),
            })?;
        for path in [cert, ca].into_iter().chain(self.cluster_file.as_deref()) {
            require_readable(path)?;
        }
        Ok(())
    }
}

/// Check a certificate path is present and openable by this process.
fn require_readable(path: &Path) -> Result<(), ReplicadmError> {
    std::fs::File::open(path).map_err(|_| ReplicadmError::MissingCertificate {
        path: path.to_path_buf(),
    })?;
    Ok(())
}

/// TLS mode for the mongod listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain TCP.
    #[default]
    Off,
    /// TLS required, certificates issued by an operator-managed CA.
    RequireTlsSelfCa,
    /// TLS required, certificates issued by Let's Encrypt.
    RequireTlsLetsEncrypt,
}

impl TlsMode {
    /// Ordering used for the relaxed-trust stripping rule: a mode at least
    /// as strict as the live one must never leave relaxed-trust keys behind.
    pub fn strictness(self) -> u8 {
        match self {
            TlsMode::Off => 0,
            TlsMode::RequireTlsSelfCa | TlsMode::RequireTlsLetsEncrypt => 1,
        }
    }
}

/// This node's declared replica-set role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Seeds the replica set and owns membership changes.
    Primary,
    /// Joins an existing set; enrolled from the primary, never self-enrolls.
    #[default]
    Secondary,
}

/// Node identity settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    /// Declared role.
    #[serde(default)]
    pub role: NodeRole,

    /// Canonical domain other members reach this node by.  Membership
    /// entries are always written with this name, never with a loopback
    /// address.
    #[serde(default)]
    pub domain: String,
}

/// Service-manager settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// systemd unit name.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Path of the managed mongod configuration file.
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Total time to wait for the service to report active after a restart.
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    /// Interval between liveness samples while waiting.
    #[serde(default = "default_restart_poll_interval")]
    pub restart_poll_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            config_path: default_config_path(),
            restart_timeout_secs: default_restart_timeout(),
            restart_poll_interval_secs: default_restart_poll_interval(),
        }
    }
}

/// Administrative user provisioned after the replica set is initiated.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminUserConfig {
    /// User name in the `admin` database.
    pub username: String,

    /// Password.  A duplicate-user response from the server is treated as
    /// already-provisioned, not an error.
    pub password: String,

    /// Roles granted on creation.
    #[serde(default = "default_admin_roles")]
    pub roles: Vec<String>,
}

impl Config {
    /// Resolve the replica-set name with explicit precedence:
    /// CLI override, then the config file, then [`DEFAULT_REPLICA_SET`].
    pub fn effective_replica_set_name(&self, cli_override: Option<&str>) -> String {
        cli_override
            .map(str::to_string)
            .or_else(|| self.mongod.replica_set_name.clone())
            .unwrap_or_else(|| DEFAULT_REPLICA_SET.to_string())
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    27017
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_db_path() -> String {
    "/var/lib/mongodb".to_string()
}

fn default_log_path() -> String {
    "/var/log/mongodb/mongod.log".to_string()
}

fn default_service_name() -> String {
    "mongod".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/mongod.conf")
}

fn default_restart_timeout() -> u64 {
    15
}

fn default_restart_poll_interval() -> u64 {
    1
}

fn default_admin_roles() -> Vec<String> {
    vec!["root".to_string()]
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.mongod.listen_port, 27017);
        assert_eq!(config.mongod.bind_address, "0.0.0.0");
        assert!(config.mongod.auth_enabled);
        assert_eq!(config.mongod.tls_mode, TlsMode::Off);
        assert_eq!(config.node.role, NodeRole::Secondary);
        assert_eq!(config.service.name, "mongod");
        assert_eq!(config.service.restart_timeout_secs, 15);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
mongod:
  listen_port: 27018
  bind_address: "0.0.0.0"
  tls_mode: require_tls_lets_encrypt
  certificate_key_file: /etc/ssl/mongo.pem
  ca_file: /etc/ssl/ca.pem
  replica_set_name: rs1
node:
  role: primary
  domain: db1.example.com
service:
  name: mongod
admin_user:
  username: admin
  password: hunter2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mongod.listen_port, 27018);
        assert_eq!(config.mongod.tls_mode, TlsMode::RequireTlsLetsEncrypt);
        assert_eq!(config.node.role, NodeRole::Primary);
        assert_eq!(config.node.domain, "db1.example.com");
        let admin = config.admin_user.unwrap();
        assert_eq!(admin.roles, vec!["root".to_string()]);
    }

    #[test]
    fn test_replica_set_name_precedence() {
        let mut config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.effective_replica_set_name(None), "rs0");

        config.mongod.replica_set_name = Some("rs-config".to_string());
        assert_eq!(config.effective_replica_set_name(None), "rs-config");
        assert_eq!(config.effective_replica_set_name(Some("rs-cli")), "rs-cli");
    }

    #[test]
    fn test_validate_tls_off_needs_no_material() {
        let desired = DesiredConfig::default();
        assert!(desired.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_certificate() {
        let desired = DesiredConfig {
            tls_mode: TlsMode::RequireTlsSelfCa,
            certificate_key_file: Some(PathBuf::from("/nonexistent/c.pem")),
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..DesiredConfig::default()
        };
        let err = desired.validate().unwrap_err();
        assert_eq!(err.kind(), "MissingCertificate");
    }

    #[test]
    fn test_validate_rejects_unset_paths() {
        let desired = DesiredConfig {
            tls_mode: TlsMode::RequireTlsSelfCa,
            ..DesiredConfig::default()
        };
        assert_eq!(desired.validate().unwrap_err().kind(), "MissingCertificate");
    }

    #[test]
    fn test_validate_accepts_readable_material() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.pem");
        let ca = dir.path().join("ca.pem");
        for path in [&cert, &ca] {
            let mut f = std::fs::File::create(path).unwrap();
            writeln!(f, "-----BEGIN CERTIFICATE-----").unwrap();
        }
        let desired = DesiredConfig {
            tls_mode: TlsMode::RequireTlsSelfCa,
            certificate_key_file: Some(cert),
            ca_file: Some(ca),
            ..DesiredConfig::default()
        };
        assert!(desired.validate().is_ok());
    }
}
