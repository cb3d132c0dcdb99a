//! Memo of recent ban verdicts by address
//!
//! A positive entry carries the rule type and the quit reason; a negative
//! entry records that the address matched nothing. Entries expire after the
//! configured TTL.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Cache entry with TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
    pub hit_count: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            hit_count: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Cached outcome of a rule match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanVerdict {
    /// Address matched nothing
    Allow,
    /// Address is banned
    Banned { kind: char, reason: String },
}

impl BanVerdict {
    pub fn is_banned(&self) -> bool {
        matches!(self, BanVerdict::Banned { .. })
    }
}

/// Verdict cache
#[derive(Debug)]
pub struct BanCache {
    entries: DashMap<IpAddr, CacheEntry<BanVerdict>>,
    ttl: Duration,
}

impl BanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Remember that `ip` is banned by a rule of type `kind`
    pub fn add_positive(&self, ip: IpAddr, kind: char, reason: &str) {
        self.entries.insert(
            ip,
            CacheEntry::new(
                BanVerdict::Banned {
                    kind,
                    reason: reason.to_string(),
                },
                self.ttl,
            ),
        );
    }

    /// Remember that `ip` matched no rule
    pub fn add_negative(&self, ip: IpAddr) {
        self.entries.insert(ip, CacheEntry::new(BanVerdict::Allow, self.ttl));
    }

    /// Cached verdict, `None` on a miss. Expired entries are dropped here.
    pub fn get(&self, ip: IpAddr) -> Option<BanVerdict> {
        let mut entry = self.entries.get_mut(&ip)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&ip);
            return None;
        }
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    /// Forget positive verdicts of one type, after such a rule is removed
    pub fn remove_type(&self, kind: char) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !matches!(entry.value, BanVerdict::Banned { kind: k, .. } if k == kind)
        });
        before - self.entries.len()
    }

    /// Drop expired entries
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("Pruned {} ban cache entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
