//! Per-address connection counters
//!
//! Two scopes are tracked:
//! - local: sessions connected to this server
//! - global: every session on the network, local ones included
//!
//! A count of zero is never stored; the address is removed instead.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::net::IpAddr;

/// Which counters a session contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneScope {
    /// Connected here: counted locally and globally
    Local,
    /// Introduced by a peer: counted globally only
    Remote,
}

#[derive(Debug, Default)]
struct CloneMaps {
    local: FxHashMap<IpAddr, u64>,
    global: FxHashMap<IpAddr, u64>,
}

/// Shared clone registry
#[derive(Debug, Default)]
pub struct CloneRegistry {
    maps: Mutex<CloneMaps>,
}

impl CloneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session for `ip`
    pub fn add(&self, ip: IpAddr, scope: CloneScope) {
        let mut maps = self.maps.lock();
        if scope == CloneScope::Local {
            *maps.local.entry(ip).or_insert(0) += 1;
        }
        *maps.global.entry(ip).or_insert(0) += 1;
    }

    /// Release a session's contribution. Must be called once per `add`.
    pub fn remove(&self, ip: IpAddr, scope: CloneScope) {
        let mut maps = self.maps.lock();
        if scope == CloneScope::Local {
            Self::decrement(&mut maps.local, ip, "local");
        }
        Self::decrement(&mut maps.global, ip, "global");
    }

    fn decrement(map: &mut FxHashMap<IpAddr, u64>, ip: IpAddr, scope: &str) {
        match map.get_mut(&ip) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                map.remove(&ip);
            }
            None => {
                tracing::warn!("Clone count underflow for {} ({} scope), ignoring", ip, scope);
            }
        }
    }

    /// Sessions from `ip` on this server
    pub fn local_count(&self, ip: IpAddr) -> u64 {
        self.maps.lock().local.get(&ip).copied().unwrap_or(0)
    }

    /// Sessions from `ip` on the network
    pub fn global_count(&self, ip: IpAddr) -> u64 {
        self.maps.lock().global.get(&ip).copied().unwrap_or(0)
    }

    /// Whether either map holds an entry for `ip`
    pub fn is_tracked(&self, ip: IpAddr) -> bool {
        let maps = self.maps.lock();
        maps.local.contains_key(&ip) || maps.global.contains_key(&ip)
    }

    /// Number of distinct addresses (local, global)
    pub fn address_counts(&self) -> (usize, usize) {
        let maps = self.maps.lock();
        (maps.local.len(), maps.global.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_twice_in_twice_out_leaves_no_entry() {
        let registry = CloneRegistry::new();
        let addr = ip("203.0.113.5");

        registry.add(addr, CloneScope::Local);
        registry.add(addr, CloneScope::Local);
        assert_eq!(registry.local_count(addr), 2);
        assert_eq!(registry.global_count(addr), 2);

        registry.remove(addr, CloneScope::Local);
        assert_eq!(registry.local_count(addr), 1);

        registry.remove(addr, CloneScope::Local);
        assert_eq!(registry.local_count(addr), 0);
        assert_eq!(registry.global_count(addr), 0);
        assert!(!registry.is_tracked(addr));
        assert_eq!(registry.address_counts(), (0, 0));
    }

    #[test]
    fn test_remote_sessions_only_touch_global() {
        let registry = CloneRegistry::new();
        let addr = ip("198.51.100.1");

        registry.add(addr, CloneScope::Local);
        registry.add(addr, CloneScope::Remote);
        assert_eq!(registry.local_count(addr), 1);
        assert_eq!(registry.global_count(addr), 2);

        registry.remove(addr, CloneScope::Remote);
        assert_eq!(registry.local_count(addr), 1);
        assert_eq!(registry.global_count(addr), 1);

        registry.remove(addr, CloneScope::Local);
        assert!(!registry.is_tracked(addr));
    }

    #[test]
    fn test_unmatched_remove_does_not_underflow() {
        let registry = CloneRegistry::new();
        let addr = ip("192.0.2.10");
        let other = ip("192.0.2.11");

        registry.add(other, CloneScope::Local);
        registry.remove(addr, CloneScope::Local);

        assert_eq!(registry.global_count(addr), 0);
        assert!(!registry.is_tracked(addr));
        assert_eq!(registry.local_count(other), 1);
    }
}
