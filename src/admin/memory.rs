//! In-memory administrative client for tests.
//!
//! Holds a scripted replica-set state, answers pings only for hosts marked
//! reachable, and records every mutating call so tests can assert the
//! at-most-once properties of the bootstrapper.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::client::{
    AdminClient, ConnectTarget, CreateUserOutcome, MemberSpec, ReplSetMember, ReplSetProbe,
    UserSpec,
};

#[derive(Debug)]
struct Inner {
    reachable: HashSet<String>,
    probe: ReplSetProbe,
    fail_initiate: bool,
    fail_reconfig: bool,
    initiate_calls: Vec<(String, Vec<MemberSpec>)>,
    reconfig_calls: Vec<Vec<MemberSpec>>,
    created_users: Vec<String>,
}

/// Scripted admin-client double.
#[derive(Debug)]
pub struct MemoryAdminClient {
    inner: Mutex<Inner>,
}

impl MemoryAdminClient {
    /// An uninitialized node reachable at the given hosts.
    pub fn new(reachable: &[&str]) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reachable: reachable.iter().map(|h| h.to_string()).collect(),
                probe: ReplSetProbe::Uninitialized,
                fail_initiate: false,
                fail_reconfig: false,
                initiate_calls: Vec::new(),
                reconfig_calls: Vec::new(),
                created_users: Vec::new(),
            }),
        }
    }

    /// Script the current replica-set state.
    pub fn set_probe(&self, probe: ReplSetProbe) {
        self.inner.lock().unwrap().probe = probe;
    }

    /// Make the next (and every) initiate call fail.
    pub fn fail_initiate(&self) {
        self.inner.lock().unwrap().fail_initiate = true;
    }

    /// Make the next (and every) reconfig call fail.
    pub fn fail_reconfig(&self) {
        self.inner.lock().unwrap().fail_reconfig = true;
    }

    /// All initiate calls recorded, as (set name, members).
    pub fn initiate_calls(&self) -> Vec<(String, Vec<MemberSpec>)> {
        self.inner.lock().unwrap().initiate_calls.clone()
    }

    /// All reconfig calls recorded.
    pub fn reconfig_calls(&self) -> Vec<Vec<MemberSpec>> {
        self.inner.lock().unwrap().reconfig_calls.clone()
    }

    /// Names of users created so far.
    pub fn created_users(&self) -> Vec<String> {
        self.inner.lock().unwrap().created_users.clone()
    }
}

impl AdminClient for MemoryAdminClient {
    fn ping(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            if inner.reachable.contains(&target.host) {
                Ok(())
            } else {
                anyhow::bail!("connection refused: {target}")
            }
        })
    }

    fn repl_set_status(
        &self,
        target: &ConnectTarget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReplSetProbe>> + Send + '_>> {
        let target = target.clone();
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            if !inner.reachable.contains(&target.host) {
                anyhow::bail!("connection refused: {target}");
            }
            Ok(inner.probe.clone())
        })
    }

    fn initiate(
        &self,
        target: &ConnectTarget,
        set_name: &str,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        let set_name = set_name.to_string();
        let members = members.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !inner.reachable.contains(&target.host) {
                anyhow::bail!("connection refused: {target}");
            }
            inner.initiate_calls.push((set_name.clone(), members.clone()));
            if inner.fail_initiate {
                anyhow::bail!("already initialized");
            }
            if matches!(inner.probe, ReplSetProbe::Member { .. }) {
                anyhow::bail!("already initialized");
            }
            inner.probe = ReplSetProbe::Member {
                set_name,
                is_primary: true,
                members: members
                    .iter()
                    .map(|m| ReplSetMember {
                        id: m.id,
                        host: m.host.clone(),
                        is_self: true,
                    })
                    .collect(),
            };
            Ok(())
        })
    }

    fn reconfig(
        &self,
        target: &ConnectTarget,
        members: &[MemberSpec],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let target = target.clone();
        let members = members.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !inner.reachable.contains(&target.host) {
                anyhow::bail!("connection refused: {target}");
            }
            inner.reconfig_calls.push(members.clone());
            if inner.fail_reconfig {
                anyhow::bail!("reconfig rejected");
            }
            if let ReplSetProbe::Member {
                members: live_members,
                ..
            } = &mut inner.probe
            {
                *live_members = members
                    .iter()
                    .map(|m| ReplSetMember {
                        id: m.id,
                        host: m.host.clone(),
                        is_self: false,
                    })
                    .collect();
                Ok(())
            } else {
                anyhow::bail!("not initialized")
            }
        })
    }

    fn create_user(
        &self,
        target: &ConnectTarget,
        user: &UserSpec,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CreateUserOutcome>> + Send + '_>> {
        let target = target.clone();
        let name = user.name.clone();
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if !inner.reachable.contains(&target.host) {
                anyhow::bail!("connection refused: {target}");
            }
            if inner.created_users.contains(&name) {
                return Ok(CreateUserOutcome::AlreadyExists);
            }
            inner.created_users.push(name);
            Ok(CreateUserOutcome::Created)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_honors_reachability() {
        let client = MemoryAdminClient::new(&["db1.example.com"]);
        let domain = ConnectTarget::new("db1.example.com", 27017);
        let loopback = ConnectTarget::new("127.0.0.1", 27017);
        assert!(client.ping(&domain).await.is_ok());
        assert!(client.ping(&loopback).await.is_err());
    }

    #[tokio::test]
    async fn test_initiate_transitions_to_member() {
        let client = MemoryAdminClient::new(&["db1.example.com"]);
        let target = ConnectTarget::new("db1.example.com", 27017);
        let members = vec![MemberSpec {
            id: 0,
            host: "db1.example.com:27017".to_string(),
        }];
        client.initiate(&target, "rs0", &members).await.unwrap();

        let probe = client.repl_set_status(&target).await.unwrap();
        assert!(matches!(probe, ReplSetProbe::Member { is_primary: true, .. }));
        // A second initiate against an initialized node fails, as the
        // real server would.
        assert!(client.initiate(&target, "rs0", &members).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_user_reports_already_exists() {
        let client = MemoryAdminClient::new(&["db1.example.com"]);
        let target = ConnectTarget::new("db1.example.com", 27017);
        let user = UserSpec {
            name: "admin".to_string(),
            password: "hunter2".to_string(),
            roles: vec!["root".to_string()],
        };
        assert_eq!(
            client.create_user(&target, &user).await.unwrap(),
            CreateUserOutcome::Created
        );
        assert_eq!(
            client.create_user(&target, &user).await.unwrap(),
            CreateUserOutcome::AlreadyExists
        );
    }
}
