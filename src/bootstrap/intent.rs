//! Membership-diff computation for the reconfig path.
//!
//! A loopback host in the live membership is unreachable from the other
//! members, so it is replaced with the canonical domain.  The member's
//! ordinal id and port are preserved.  Members already using a
//! non-loopback hostname are never altered, even when that hostname
//! differs from the current run's domain -- renamed nodes are legitimate.

use crate::admin::client::{MemberSpec, ReplSetMember};

/// Computed membership rewrite.  `members` is the full desired list;
/// `replaced` counts the loopback entries rewritten.  `replaced == 0`
/// means no reconfig is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigIntent {
    pub members: Vec<MemberSpec>,
    pub replaced: usize,
}

impl ReconfigIntent {
    pub fn is_noop(&self) -> bool {
        self.replaced == 0
    }
}

/// Hostnames that resolve to the local node only.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

/// Split `host:port`, tolerating a bare host with no port.
fn split_host_port(host_port: &str) -> (&str, Option<&str>) {
    // A bracketed IPv6 literal keeps its colons inside the brackets.
    if let Some(end) = host_port.rfind(']') {
        let (host, rest) = host_port.split_at(end + 1);
        return (host, rest.strip_prefix(':'));
    }
    // Several colons without brackets is a bare IPv6 address, not host:port.
    if host_port.matches(':').count() > 1 {
        return (host_port, None);
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_port, None),
    }
}

fn is_loopback(host_port: &str) -> bool {
    let (host, _) = split_host_port(host_port);
    LOOPBACK_HOSTS.contains(&host)
}

/// Compute the membership rewrite for `members` given the canonical
/// `domain`.  `default_port` is used for a loopback entry that carries no
/// explicit port.
pub fn compute(members: &[ReplSetMember], domain: &str, default_port: u16) -> ReconfigIntent {
    let mut replaced = 0;
    let rewritten = members
        .iter()
        .map(|member| {
            let host = if is_loopback(&member.host) {
                replaced += 1;
                let (_, port) = split_host_port(&member.host);
                format!("{domain}:{}", port.unwrap_or(&default_port.to_string()))
            } else {
                member.host.clone()
            };
            MemberSpec {
                id: member.id,
                host,
            }
        })
        .collect();
    ReconfigIntent {
        members: rewritten,
        replaced,
    }
}
