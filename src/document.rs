//! Structured view of the on-disk mongod configuration document.
//!
//! The document is parsed into a [`serde_yaml::Mapping`] and mutated at the
//! value level, never with textual surgery.  The tool owns exactly three
//! top-level sections -- `net`, `security`, `replication` -- and rewrites only
//! those.  Everything else (`storage`, `systemLog`, `processManagement`,
//! operator additions) round-trips untouched, so hand-edits outside the
//! owned sections survive reconciliation.
//!
//! Relaxed-trust keys (`allowInvalidCertificates`,
//! `allowConnectionsWithoutCertificates`, `allowInvalidHostnames`, and their
//! legacy `ssl` spellings) are stripped whenever the requested TLS mode is at
//! least as strict as the live one.  The legacy `net.ssl` section is removed
//! outright whenever `net.tls` keys are written.

use serde_yaml::{Mapping, Value};

use crate::config::{DesiredConfig, TlsMode};

/// Relaxed-trust keys never allowed to survive a same-or-stricter request.
const RELAXED_TRUST_KEYS: &[&str] = &[
    "allowInvalidCertificates",
    "allowConnectionsWithoutCertificates",
    "allowInvalidHostnames",
    "sslAllowInvalidCertificates",
    "sslAllowConnectionsWithoutCertificates",
    "sslAllowInvalidHostnames",
];

/// State of one owned top-level section relative to the desired settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    /// The section does not exist in the live document.
    Absent,
    /// The section exists and already carries the desired effective settings.
    Matching,
    /// The section exists but differs from the desired effective settings.
    Divergent,
}

/// The three top-level sections the reconciler owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedSection {
    Net,
    Security,
    Replication,
}

impl OwnedSection {
    /// All owned sections, in document order.
    pub const ALL: [OwnedSection; 3] = [
        OwnedSection::Net,
        OwnedSection::Security,
        OwnedSection::Replication,
    ];

    /// YAML key of this section.
    pub fn key(self) -> &'static str {
        match self {
            OwnedSection::Net => "net",
            OwnedSection::Security => "security",
            OwnedSection::Replication => "replication",
        }
    }
}

/// Parsed mongod configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct MongodDocument {
    root: Mapping,
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

impl MongodDocument {
    /// Parse a document from YAML text.
    ///
    /// The top level must be a mapping (an empty file parses as an empty
    /// mapping); anything else is a parse failure the caller treats the
    /// same way as a malformed file.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        let value: Value = serde_yaml::from_str(text)?;
        match value {
            Value::Mapping(root) => Ok(Self { root }),
            other => Err(serde::de::Error::custom(format!(
                "expected a mapping at the document root, found {}",
                type_name(&other)
            ))),
        }
    }

    /// An empty document, used when no live file exists.
    pub fn empty() -> Self {
        Self {
            root: Mapping::new(),
        }
    }

    /// Build a complete document from the desired settings alone, including
    /// the `storage` and `systemLog` sections a fresh install needs.  Used
    /// only when no live document exists; reconciliation of an existing
    /// document never touches those two sections.
    pub fn synthesize(desired: &DesiredConfig, replica_set_name: &str) -> Self {
        let mut doc = Self::empty();

        let mut storage = Mapping::new();
        storage.insert(key("dbPath"), Value::String(desired.db_path.clone()));
        doc.root.insert(key("storage"), Value::Mapping(storage));

        let mut system_log = Mapping::new();
        system_log.insert(key("destination"), Value::String("file".to_string()));
        system_log.insert(key("logAppend"), Value::Bool(true));
        system_log.insert(key("path"), Value::String(desired.log_path.clone()));
        doc.root.insert(key("systemLog"), Value::Mapping(system_log));

        doc.apply(desired, replica_set_name);
        doc
    }

    /// Serialize back to YAML text.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&Value::Mapping(self.root.clone()))
    }

    /// TLS strictness of the live document, for the stripping rule.
    fn live_strictness(&self) -> u8 {
        let net = match self.root.get(key("net")).and_then(Value::as_mapping) {
            Some(net) => net,
            None => return 0,
        };
        let mode = net
            .get(key("tls"))
            .and_then(Value::as_mapping)
            .and_then(|tls| tls.get(key("mode")))
            .or_else(|| {
                net.get(key("ssl"))
                    .and_then(Value::as_mapping)
                    .and_then(|ssl| ssl.get(key("mode")))
            })
            .and_then(Value::as_str);
        match mode {
            Some("requireTLS") | Some("requireSSL") => 1,
            _ => 0,
        }
    }

    /// State of one owned section relative to `desired`.
    ///
    /// `Matching` means applying the desired settings would leave the
    /// section byte-identical, which is also the reconciler's definition of
    /// "no write needed".
    pub fn section_state(
        &self,
        section: OwnedSection,
        desired: &DesiredConfig,
        replica_set_name: &str,
    ) -> SectionState {
        let live = self.root.get(key(section.key()));
        if live.is_none() {
            return SectionState::Absent;
        }
        let mut applied = self.clone();
        applied.apply(desired, replica_set_name);
        if applied.root.get(key(section.key())) == live {
            SectionState::Matching
        } else {
            SectionState::Divergent
        }
    }

    /// Whether the live document already carries the desired effective
    /// settings in every owned section.  Sections outside the owned set
    /// never influence this.
    pub fn matches(&self, desired: &DesiredConfig, replica_set_name: &str) -> bool {
        let mut applied = self.clone();
        applied.apply(desired, replica_set_name);
        applied.root == self.root
    }

    /// Rewrite the owned sections to the desired effective settings,
    /// leaving every other top-level section untouched.
    pub fn apply(&mut self, desired: &DesiredConfig, replica_set_name: &str) {
        let stricter_or_equal = desired.tls_mode.strictness() >= self.live_strictness();
        self.apply_net(desired, stricter_or_equal);
        self.apply_security(desired);
        self.apply_replication(replica_set_name);
    }

    fn section_mut(&mut self, name: &str) -> &mut Mapping {
        let entry = self
            .root
            .entry(key(name))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        // A scalar where a section belongs is malformed; replace it.
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        entry.as_mapping_mut().unwrap()
    }

    fn apply_net(&mut self, desired: &DesiredConfig, stricter_or_equal: bool) {
        let port = desired.listen_port;
        let bind = desired.bind_address.clone();
        let net = self.section_mut("net");

        net.insert(key("port"), Value::Number(port.into()));
        net.insert(key("bindIp"), Value::String(bind));

        // The legacy ssl section is superseded in every mode we can write.
        net.remove(key("ssl"));

        match desired.tls_mode {
            TlsMode::Off => {
                net.remove(key("tls"));
            }
            TlsMode::RequireTlsSelfCa | TlsMode::RequireTlsLetsEncrypt => {
                // Merge into any existing tls mapping so benign operator
                // extras survive; the relaxed-trust keys do not.
                let has_tls_mapping = net
                    .get(key("tls"))
                    .map(Value::is_mapping)
                    .unwrap_or(false);
                if !has_tls_mapping {
                    net.insert(key("tls"), Value::Mapping(Mapping::new()));
                }
                let tls = net
                    .get_mut(key("tls"))
                    .and_then(Value::as_mapping_mut)
                    .unwrap();
                tls.insert(key("mode"), Value::String("requireTLS".to_string()));
                if let Some(cert) = &desired.certificate_key_file {
                    tls.insert(
                        key("certificateKeyFile"),
                        Value::String(cert.display().to_string()),
                    );
                }
                if let Some(ca) = &desired.ca_file {
                    tls.insert(key("CAFile"), Value::String(ca.display().to_string()));
                }
                match &desired.cluster_file {
                    Some(cluster) => {
                        tls.insert(
                            key("clusterFile"),
                            Value::String(cluster.display().to_string()),
                        );
                    }
                    None => {
                        tls.remove(key("clusterFile"));
                    }
                }
                if stricter_or_equal {
                    for relaxed in RELAXED_TRUST_KEYS {
                        tls.remove(key(relaxed));
                    }
                }
            }
        }

        // Legacy relaxed spellings sometimes live directly under net.
        if stricter_or_equal {
            for relaxed in RELAXED_TRUST_KEYS {
                net.remove(key(relaxed));
            }
        }
    }

    fn apply_security(&mut self, desired: &DesiredConfig) {
        let auth = desired.auth_enabled;
        let x509 = desired.cluster_file.is_some();
        let security = self.section_mut("security");
        security.insert(
            key("authorization"),
            Value::String(if auth { "enabled" } else { "disabled" }.to_string()),
        );
        if x509 {
            security.insert(key("clusterAuthMode"), Value::String("x509".to_string()));
            // keyFile and x509 cluster auth are mutually exclusive.
            security.remove(key("keyFile"));
        } else if security.get(key("clusterAuthMode")).and_then(Value::as_str) == Some("x509") {
            security.remove(key("clusterAuthMode"));
        }
    }

    fn apply_replication(&mut self, replica_set_name: &str) {
        let name = replica_set_name.to_string();
        let replication = self.section_mut("replication");
        replication.insert(key("replSetName"), Value::String(name));
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesiredConfig;
    use std::path::PathBuf;

    fn plain_desired() -> DesiredConfig {
        DesiredConfig {
            listen_port: 27017,
            bind_address: "0.0.0.0".to_string(),
            auth_enabled: true,
            ..DesiredConfig::default()
        }
    }

    fn tls_desired() -> DesiredConfig {
        DesiredConfig {
            tls_mode: TlsMode::RequireTlsSelfCa,
            certificate_key_file: Some(PathBuf::from("/c.pem")),
            ca_file: Some(PathBuf::from("/ca.pem")),
            ..plain_desired()
        }
    }

    #[test]
    fn test_adds_net_section_when_absent() {
        let mut doc = MongodDocument::parse("storage:\n  dbPath: /var/lib/mongodb\n").unwrap();
        let desired = plain_desired();
        assert_eq!(
            doc.section_state(OwnedSection::Net, &desired, "rs0"),
            SectionState::Absent
        );
        assert!(!doc.matches(&desired, "rs0"));

        doc.apply(&desired, "rs0");
        let text = doc.render().unwrap();
        assert!(text.contains("port: 27017"));
        assert!(text.contains("bindIp: 0.0.0.0"));
        assert!(text.contains("replSetName: rs0"));
        assert!(doc.matches(&desired, "rs0"));
    }

    #[test]
    fn test_matching_tls_document_is_a_noop() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
  tls:
    mode: requireTLS
    certificateKeyFile: /c.pem
    CAFile: /ca.pem
security:
  authorization: enabled
replication:
  replSetName: rs0
";
        let doc = MongodDocument::parse(live).unwrap();
        let desired = tls_desired();
        assert!(doc.matches(&desired, "rs0"));
        for section in OwnedSection::ALL {
            assert_eq!(
                doc.section_state(section, &desired, "rs0"),
                SectionState::Matching
            );
        }
    }

    #[test]
    fn test_unowned_sections_round_trip() {
        let live = "\
storage:
  dbPath: /mnt/data
  wiredTiger:
    engineConfig:
      cacheSizeGB: 4
systemLog:
  destination: file
  path: /var/log/mongodb/mongod.log
operationProfiling:
  mode: slowOp
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&plain_desired(), "rs0");
        let text = doc.render().unwrap();
        assert!(text.contains("dbPath: /mnt/data"));
        assert!(text.contains("cacheSizeGB: 4"));
        assert!(text.contains("mode: slowOp"));
    }

    #[test]
    fn test_legacy_ssl_section_removed_on_tls_migration() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
  ssl:
    mode: requireSSL
    PEMKeyFile: /old.pem
    sslAllowInvalidCertificates: true
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&tls_desired(), "rs0");
        let text = doc.render().unwrap();
        assert!(!text.contains("ssl:"));
        assert!(!text.contains("PEMKeyFile"));
        assert!(text.contains("certificateKeyFile: /c.pem"));
    }

    #[test]
    fn test_relaxed_trust_keys_never_survive_stricter_request() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
  tls:
    mode: requireTLS
    certificateKeyFile: /c.pem
    CAFile: /ca.pem
    allowInvalidCertificates: true
    allowConnectionsWithoutCertificates: true
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&tls_desired(), "rs0");
        let text = doc.render().unwrap();
        for relaxed in RELAXED_TRUST_KEYS {
            assert!(!text.contains(relaxed), "{relaxed} survived");
        }
    }

    #[test]
    fn test_benign_tls_extras_survive_merge() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
  tls:
    mode: requireTLS
    certificateKeyFile: /c.pem
    CAFile: /ca.pem
    logVersions: TLS1_3
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&tls_desired(), "rs0");
        assert!(doc.render().unwrap().contains("logVersions: TLS1_3"));
    }

    #[test]
    fn test_tls_off_removes_tls_and_ssl() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
  tls:
    mode: requireTLS
    certificateKeyFile: /c.pem
    CAFile: /ca.pem
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&plain_desired(), "rs0");
        let text = doc.render().unwrap();
        assert!(!text.contains("tls:"));
        assert!(!text.contains("requireTLS"));
    }

    #[test]
    fn test_cluster_file_sets_x509_cluster_auth() {
        let desired = DesiredConfig {
            cluster_file: Some(PathBuf::from("/cluster.pem")),
            ..tls_desired()
        };
        let doc = MongodDocument::synthesize(&desired, "rs0");
        let text = doc.render().unwrap();
        assert!(text.contains("clusterFile: /cluster.pem"));
        assert!(text.contains("clusterAuthMode: x509"));
        assert!(!text.contains("keyFile"));
    }

    #[test]
    fn test_dropping_cluster_file_drops_x509_mode() {
        let live = "\
net:
  port: 27017
  bindIp: 0.0.0.0
security:
  authorization: enabled
  clusterAuthMode: x509
replication:
  replSetName: rs0
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&plain_desired(), "rs0");
        assert!(!doc.render().unwrap().contains("clusterAuthMode"));
    }

    #[test]
    fn test_synthesize_includes_storage_and_log() {
        let doc = MongodDocument::synthesize(&plain_desired(), "rs0");
        let text = doc.render().unwrap();
        assert!(text.contains("dbPath: /var/lib/mongodb"));
        assert!(text.contains("path: /var/log/mongodb/mongod.log"));
        assert!(text.contains("logAppend: true"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut doc = MongodDocument::synthesize(&tls_desired(), "rs0");
        let first = doc.render().unwrap();
        doc.apply(&tls_desired(), "rs0");
        assert_eq!(doc.render().unwrap(), first);
    }

    #[test]
    fn test_rejects_non_mapping_root() {
        assert!(MongodDocument::parse("- a\n- b\n").is_err());
        assert!(MongodDocument::parse("just a string").is_err());
    }

    #[test]
    fn test_empty_text_parses_as_empty_document() {
        let doc = MongodDocument::parse("").unwrap();
        assert_eq!(doc, MongodDocument::empty());
    }

    #[test]
    fn test_preserves_extra_replication_keys() {
        let live = "\
replication:
  replSetName: old
  oplogSizeMB: 2048
";
        let mut doc = MongodDocument::parse(live).unwrap();
        doc.apply(&plain_desired(), "rs0");
        let text = doc.render().unwrap();
        assert!(text.contains("replSetName: rs0"));
        assert!(text.contains("oplogSizeMB: 2048"));
    }
}
