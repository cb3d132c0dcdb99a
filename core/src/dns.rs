//! Reverse DNS for new client sessions
//!
//! Lookups run as detached tasks. On completion the session is looked up
//! again by UID; if it has gone in the meantime the result is discarded.

use crate::state::ServerState;
use crate::utils::address::MAX_HOST_LENGTH;
use crate::{Error, Message, Result};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Reverse lookup of a client address
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Hostname for `ip`, `None` if it has none or the lookup failed
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String>;
}

/// Resolver using the system configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl SystemResolver {
    pub fn from_system_conf(timeout: Duration) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Generic(format!("Failed to create DNS resolver: {}", e)))?;
        Ok(Self { resolver, timeout })
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        match timeout(self.timeout, self.resolver.reverse_lookup(ip)).await {
            Ok(Ok(names)) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                tracing::debug!("Reverse lookup for {} failed: {}", ip, e);
                None
            }
            Err(_) => {
                tracing::debug!("Reverse lookup for {} timed out", ip);
                None
            }
        }
    }
}

/// Whether a resolved name can be used as a host
fn usable_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= MAX_HOST_LENGTH
        && !host.starts_with(':')
        && host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

/// Resolve a session's hostname in the background
pub fn spawn_lookup(
    state: Arc<ServerState>,
    resolver: Arc<dyn HostResolver>,
    uid: String,
    ip: IpAddr,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let host = resolver.reverse_lookup(ip).await.filter(|host| usable_host(host));
        complete_lookup(&state, &uid, ip, host);
    })
}

/// Apply a finished lookup to the session, if it still exists
pub fn complete_lookup(state: &ServerState, uid: &str, ip: IpAddr, host: Option<String>) -> bool {
    let notice = match host {
        Some(ref host) => format!("*** Found your hostname ({})", host),
        None => format!(
            "*** Could not resolve your hostname; using your IP address ({}) instead.",
            ip
        ),
    };

    if !state.users.complete_dns(uid, host) {
        tracing::debug!("Discarding DNS result for departed session {}", uid);
        return false;
    }
    if let Some(user) = state.users.get(uid) {
        user.send(Message::notice("Auth", notice).source(state.server_name()));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_host() {
        assert!(usable_host("host.example.net"));
        assert!(!usable_host(""));
        assert!(!usable_host(&"a".repeat(MAX_HOST_LENGTH + 1)));
        assert!(!usable_host("bad host"));
        assert!(!usable_host(":weird"));
    }
}
