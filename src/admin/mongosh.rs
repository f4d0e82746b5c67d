//! Administrative client backed by `mongosh`.
//!
//! Each call shells out to `mongosh --quiet --eval`, asking the shell to
//! print one EJSON document which is then parsed with serde_json.  Errors
//! thrown inside the shell are caught and printed as `{ok: 0, ...}`
//! documents so every invocation produces parseable output regardless of
//! server state.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Context;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::client::{
    AdminClient, ConnectTarget, CreateUserOutcome, MemberSpec, ReplSetMember, ReplSetProbe,
    UserSpec,
};
use crate::config::{Config, TlsMode};

/// TLS options forwarded to mongosh.
#[derive(Debug, Clone, Default)]
pub struct TlsConnectOptions {
    pub ca_file: Option<PathBuf>,
    pub certificate_key_file: Option<PathBuf>,
}

/// Drives mongod administration through the `mongosh` binary.
pub struct MongoshClient {
    binary: String,
    tls: Option<TlsConnectOptions>,
    credentials: Option<(String, String)>,
}

impl MongoshClient {
    pub fn new(tls: Option<TlsConnectOptions>, credentials: Option<(String, String)>) -> Self {
        Self {
            binary: "mongosh".to_string(),
            tls,
            credentials,
        }
    }

    /// Build a client whose connect options follow the tool configuration:
    /// TLS material when a TLS mode is desired, credentials when an admin
    /// user is configured.
    pub fn from_config(config: &Config) -> Self {
        let tls = match config.mongod.tls_mode {
            TlsMode::Off => None,
            TlsMode::RequireTlsSelfCa | TlsMode::RequireTlsLetsEncrypt => {
                Some(TlsConnectOptions {
                    ca_file: config.mongod.ca_file.clone(),
                    certificate_key_file: config.mongod.certificate_key_file.clone(),
                })
            }
        };
        let credentials = config
            .admin_user
            .as_ref()
            .map(|u| (u.username.clone(), u.password.clone()));
        Self::new(tls, credentials)
    }

    /// Run one eval snippet against `target` and return its stdout.
    async fn eval(&self, target: &ConnectTarget, script: &str) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--quiet")
            .arg("--host")
            .arg(&target.host)
            .arg("--port")
            .arg(target.port.to_string());
        if let Some(tls) = &self.tls {
            cmd.arg("--tls");
            if let Some(ca) = &tls.ca_file {
                cmd.arg("--tlsCAFile").arg(ca);
            }
            if let Some(cert) = &tls.certificate_key_file {
                cmd.arg("--tlsCertificateKeyFile").arg(cert);
            }
        }
        if let Some((user, password)) = &self.credentials {
            cmd.arg("-u")
                .arg(user)
                .arg("-p")
                .arg(password)
                .arg("--authenticationDatabase")
                .arg("admin");
        }
        cmd.arg("--eval").arg(script);

        debug!(target = %target, "running mongosh");
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "mongosh against {target} exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run one eval snippet and parse its output as a single EJSON document.
    async fn eval_json(&self, target: &ConnectTarget, script: &str) -> anyhow::Result<Value> {
        let stdout = self.eval(target, script).await?;
        // mongosh occasionally prints connection banners before the
        // document even with --quiet; keep only the last line.
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        serde_json::from_str(line)
            .with_context(|| format!("unparseable mongosh output: {stdout:?}"))
    }
}

/// Wrap a shell expression so thrown server errors come back as
/// `{ok: 0, codeName, errmsg}` documents on stdout.
fn guarded(expr: &str) -> String {
    format!(
        "try {{ print(EJSON.stringify({expr})) }} catch (e) \
         {{ print(EJSON.stringify({{ok: 0, codeName: e.codeName, errmsg: e.message}})) }}"
    )
}

fn members_json(members: &[MemberSpec]) -> String {
    let entries: Vec<Value> = members
        .iter()
        .map(|m| serde_json::json!({"_id": m.id, "host": m.host}))
        .collect();
    Value::Array(entries).to_string()
}

/// Numeric fields in relaxed EJSON may be plain numbers or
/// `{"$numberInt": "..."}` / `{"$numberLong": "..."}` wrappers.
fn ejson_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Object(map) => map
            .get("$numberInt")
            .or_else(|| map.get("$numberLong"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn field_str<'a>(doc: &'a Value, name: &str) -> Option<&'a str> {
    doc.get(name).and_then(Value::as_str)
}

/// Interpret a `rs.status()` document (or the caught error standing in for
/// one) as a [`ReplSetProbe`].
pub(crate) fn parse_status(doc: &Value) -> anyhow::Result<ReplSetProbe> {
    let ok = doc.get("ok").and_then(ejson_number).unwrap_or(0);
    if ok != 1 {
        let code_name = field_str(doc, "codeName").unwrap_or("");
        if code_name == "NotYetInitialized" {
            return Ok(ReplSetProbe::Uninitialized);
        }
        anyhow::bail!(
            "rs.status() failed: {} ({})",
            field_str(doc, "errmsg").unwrap_or("unknown error"),
            code_name
        );
    }

    let set_name = field_str(doc, "set").unwrap_or("").to_string();
    let my_state = doc.get("myState").and_then(ejson_number).unwrap_or(0);
    let members = doc
        .get("members")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(ReplSetMember {
                        id: entry.get("_id").and_then(ejson_number)? as u32,
                        host: field_str(entry, "name")?.to_string(),
                        is_self: entry
                            .get("self")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ReplSetProbe::Member {
        set_name,
        // myState 1 is PRIMARY.
        is_primary: my_state == 1,
        members,
    })
}

/// Check an `{ok: ...}` command result, surfacing errmsg on failure.
fn check_ok(doc: &Value, what: &str) -> anyhow::Result<()> {
    let ok = doc.get("ok").and_then(ejson_number).unwrap_or(0);
    if ok == 1 {
        return Ok(());
    }
    anyhow::bail!(
        "{what} failed: {} ({})",
        field_str(doc, "errmsg").unwrap_or("unknown error"),
        field_str(doc, "codeName").unwrap_or("")
    );
}

impl AdminClient for MongoshClient {
    fn ping(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        Box::pin(async move {
            let doc = self
                .eval_json(&target, &guarded("db.adminCommand({ping: 1})"))
                .await?;
            check_ok(&doc, "ping")
        })
    }

    fn repl_set_status(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReplSetProbe>> + Send + '_>> {
        let target = target.clone();
        Box::pin(async move {
            let doc = self.eval_json(&target, &guarded("rs.status()")).await?;
            parse_status(&doc)
        })
    }

    fn initiate(
        &self,
        target: &ConnectTarget,
        set_name: &str,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        let script = guarded(&format!(
            "rs.initiate({{_id: {}, members: {}}})",
            Value::String(set_name.to_string()),
            members_json(members)
        ));
        Box::pin(async move {
            let doc = self.eval_json(&target, &script).await?;
            check_ok(&doc, "rs.initiate")
        })
    }

    fn reconfig(
        &self,
        target: &ConnectTarget,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        // Rewrites membership in place: fetch the live config, swap the
        // members array, bump the version.
        let script = guarded(&format!(
            "(function() {{ var cfg = rs.conf(); cfg.members = {}; \
             cfg.version = cfg.version + 1; return rs.reconfig(cfg); }})()",
            members_json(members)
        ));
        Box::pin(async move {
            let doc = self.eval_json(&target, &script).await?;
            check_ok(&doc, "rs.reconfig")
        })
    }

    fn create_user(
        &self,
        target: &ConnectTarget,
        user: &UserSpec,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CreateUserOutcome>> + Send + '_>> {
        let target = target.clone();
        let roles: Vec<Value> = user
            .roles
            .iter()
            .map(|r| serde_json::json!({"role": r, "db": "admin"}))
            .collect();
        let script = guarded(&format!(
            "db.getSiblingDB('admin').createUser({{user: {}, pwd: {}, roles: {}}})",
            Value::String(user.name.clone()),
            Value::String(user.password.clone()),
            Value::Array(roles)
        ));
        Box::pin(async move {
            let doc = self.eval_json(&target, &script).await?;
            let errmsg = field_str(&doc, "errmsg").unwrap_or("");
            if errmsg.contains("already exists") {
                return Ok(CreateUserOutcome::AlreadyExists);
            }
            check_ok(&doc, "createUser")?;
            Ok(CreateUserOutcome::Created)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uninitialized_status() {
        let doc: Value = serde_json::from_str(
            r#"{"ok": 0, "codeName": "NotYetInitialized",
                "errmsg": "no replset config has been received"}"#,
        )
        .unwrap();
        assert_eq!(parse_status(&doc).unwrap(), ReplSetProbe::Uninitialized);
    }

    #[test]
    fn test_parse_primary_status() {
        let doc: Value = serde_json::from_str(
            r#"{"set": "rs0", "myState": 1, "ok": 1, "members": [
                  {"_id": 0, "name": "db1.example.com:27017",
                   "stateStr": "PRIMARY", "self": true},
                  {"_id": 1, "name": "db2.example.com:27017",
                   "stateStr": "SECONDARY"}]}"#,
        )
        .unwrap();
        let probe = parse_status(&doc).unwrap();
        match probe {
            ReplSetProbe::Member {
                set_name,
                is_primary,
                members,
            } => {
                assert_eq!(set_name, "rs0");
                assert!(is_primary);
                assert_eq!(members.len(), 2);
                assert!(members[0].is_self);
                assert!(!members[1].is_self);
                assert_eq!(members[1].host, "db2.example.com:27017");
            }
            other => panic!("unexpected probe: {other:?}"),
        }
    }

    #[test]
    fn test_parse_status_with_ejson_number_wrappers() {
        let doc: Value = serde_json::from_str(
            r#"{"set": "rs0", "myState": {"$numberInt": "2"}, "ok": {"$numberInt": "1"},
                "members": [{"_id": {"$numberInt": "0"},
                             "name": "db1.example.com:27017", "self": true}]}"#,
        )
        .unwrap();
        let probe = parse_status(&doc).unwrap();
        match probe {
            ReplSetProbe::Member { is_primary, members, .. } => {
                assert!(!is_primary);
                assert_eq!(members[0].id, 0);
            }
            other => panic!("unexpected probe: {other:?}"),
        }
    }

    #[test]
    fn test_parse_status_surfaces_other_errors() {
        let doc: Value = serde_json::from_str(
            r#"{"ok": 0, "codeName": "Unauthorized", "errmsg": "command replSetGetStatus requires authentication"}"#,
        )
        .unwrap();
        let err = parse_status(&doc).unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[test]
    fn test_members_json_shape() {
        let members = vec![
            MemberSpec {
                id: 0,
                host: "db1.example.com:27017".to_string(),
            },
            MemberSpec {
                id: 1,
                host: "db2.example.com:27017".to_string(),
            },
        ];
        assert_eq!(
            members_json(&members),
            r#"[{"_id":0,"host":"db1.example.com:27017"},{"_id":1,"host":"db2.example.com:27017"}]"#
        );
    }

    #[test]
    fn test_guarded_wraps_expression() {
        let script = guarded("rs.status()");
        assert!(script.starts_with("try {"));
        assert!(script.contains("EJSON.stringify(rs.status())"));
        assert!(script.contains("catch (e)"));
    }
}
