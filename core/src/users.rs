//! Session store
//!
//! Owns every known session, local and remote, and keeps the clone registry
//! in step with it: a session's clone contribution is added when it enters the
//! store and released exactly once when it leaves.

use crate::clones::{CloneRegistry, CloneScope};
use crate::{Error, Message, MessageType, Result, User};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const UID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UID_SUFFIX_LEN: usize = 6;

/// Sequential UID allocator: `SID` followed by six characters, `AAAAAA` first
#[derive(Debug)]
pub struct UidGenerator {
    sid: String,
    current: Mutex<[u8; UID_SUFFIX_LEN]>,
}

impl UidGenerator {
    pub fn new(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            current: Mutex::new([0; UID_SUFFIX_LEN]),
        }
    }

    /// Next UID. Wraps after 36^6 allocations.
    pub fn next_uid(&self) -> String {
        let mut current = self.current.lock();
        let mut uid = self.sid.clone();
        uid.extend(current.iter().map(|&digit| UID_ALPHABET[digit as usize] as char));

        for digit in current.iter_mut().rev() {
            if (*digit as usize) + 1 < UID_ALPHABET.len() {
                *digit += 1;
                break;
            }
            *digit = 0;
        }
        uid
    }
}

/// Session store
#[derive(Debug)]
pub struct UserManager {
    users: DashMap<String, User>,
    nicks: DashMap<String, String>,
    clones: Arc<CloneRegistry>,
    uids: UidGenerator,
    local_count: AtomicUsize,
}

impl UserManager {
    pub fn new(sid: &str, clones: Arc<CloneRegistry>) -> Self {
        Self {
            users: DashMap::new(),
            nicks: DashMap::new(),
            clones,
            uids: UidGenerator::new(sid),
            local_count: AtomicUsize::new(0),
        }
    }

    /// Allocate a UID for a new local session
    pub fn next_uid(&self) -> String {
        self.uids.next_uid()
    }

    /// The shared clone registry
    pub fn clones(&self) -> &Arc<CloneRegistry> {
        &self.clones
    }

    /// Add a session and count it as a clone of its address
    pub fn insert(&self, user: User) -> Result<()> {
        let scope = user.clone_scope();
        let ip = user.ip;
        let nick = user.nick.to_lowercase();
        let uid = user.uid.clone();

        match self.users.entry(uid.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateUid(uid)),
            Entry::Vacant(slot) => {
                slot.insert(user);
            }
        }

        if !nick.is_empty() {
            self.nicks.insert(nick, uid);
        }
        if scope == CloneScope::Local {
            self.local_count.fetch_add(1, Ordering::SeqCst);
        }
        self.clones.add(ip, scope);
        Ok(())
    }

    /// Remove a session. Clone counts are released here and nowhere else.
    pub fn remove(&self, uid: &str) -> Option<User> {
        let (_, user) = self.users.remove(uid)?;

        if !user.nick.is_empty() {
            self.nicks.remove_if(&user.nick.to_lowercase(), |_, owner| owner == uid);
        }
        let scope = user.clone_scope();
        if scope == CloneScope::Local {
            self.local_count.fetch_sub(1, Ordering::SeqCst);
        }
        self.clones.remove(user.ip, scope);
        Some(user)
    }

    /// Disconnect a session, telling a local client why
    pub fn quit(&self, uid: &str, reason: &str) -> Option<User> {
        let user = self.remove(uid)?;
        if user.is_local() {
            let target = if user.ident.is_empty() { "unknown" } else { &user.ident };
            user.send(
                Message::new(MessageType::Error, Vec::new())
                    .trailing(format!("Closing link: ({}@{}) [{}]", target, user.host, reason)),
            );
        }
        tracing::debug!("Quit {} ({}): {}", user.uid, user.host, reason);
        Some(user)
    }

    /// Remove every session on the given servers, as after a netsplit
    pub fn remove_server_users(&self, servers: &[String], reason: &str) -> Vec<User> {
        let doomed: Vec<String> = self
            .users
            .iter()
            .filter(|entry| servers.iter().any(|name| name.eq_ignore_ascii_case(&entry.server)))
            .map(|entry| entry.key().clone())
            .collect();

        doomed.iter().filter_map(|uid| self.quit(uid, reason)).collect()
    }

    /// Session by UID
    pub fn get(&self, uid: &str) -> Option<User> {
        self.users.get(uid).map(|entry| entry.value().clone())
    }

    /// Session by nickname, case-insensitive
    pub fn get_by_nick(&self, nick: &str) -> Option<User> {
        let uid = self.nicks.get(&nick.to_lowercase())?.value().clone();
        self.get(&uid)
    }

    /// Apply a change to a stored session
    pub fn update<F>(&self, uid: &str, change: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        let Some(mut entry) = self.users.get_mut(uid) else {
            return false;
        };
        let old_nick = entry.nick.to_lowercase();
        change(entry.value_mut());
        let new_nick = entry.nick.to_lowercase();
        drop(entry);

        if old_nick != new_nick {
            if !old_nick.is_empty() {
                self.nicks.remove_if(&old_nick, |_, owner| owner == uid);
            }
            if !new_nick.is_empty() {
                self.nicks.insert(new_nick, uid.to_string());
            }
        }
        true
    }

    /// Record the outcome of a hostname lookup. Returns false when the
    /// session is gone, in which case nothing is touched.
    pub fn complete_dns(&self, uid: &str, hostname: Option<String>) -> bool {
        self.update(uid, |user| {
            if let Some(hostname) = hostname {
                user.host = hostname.clone();
                user.real_host = hostname;
            }
            user.dns_done = true;
        })
    }

    /// Fully registered sessions, ordered by UID
    pub fn registered_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|entry| entry.is_registered())
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        users
    }

    /// Sessions connected to this server
    pub fn local_count(&self) -> usize {
        self.local_count.load(Ordering::SeqCst)
    }

    /// All sessions
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use tokio::sync::mpsc;

    fn manager() -> UserManager {
        UserManager::new("0AA", Arc::new(CloneRegistry::new()))
    }

    #[test]
    fn test_uid_sequence() {
        let uids = UidGenerator::new("0AA");
        assert_eq!(uids.next_uid(), "0AAAAAAAA");
        assert_eq!(uids.next_uid(), "0AAAAAAAB");
        for _ in 0..34 {
            uids.next_uid();
        }
        assert_eq!(uids.next_uid(), "0AAAAAABA");
    }

    #[test]
    fn test_duplicate_uid_is_rejected_without_counting() {
        let users = manager();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        users.insert(User::remote("1BBAAAAAA", "bob", "leaf", ip, "h", 1)).unwrap();

        let err = users.insert(User::remote("1BBAAAAAA", "bob2", "leaf", ip, "h", 1));
        assert!(matches!(err, Err(Error::DuplicateUid(_))));
        assert_eq!(users.clones().global_count(ip), 1);
    }

    #[test]
    fn test_quit_releases_clones_once() {
        let users = manager();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let uid = users.next_uid();
        users
            .insert(User::local(uid.clone(), "hub", ip, 40000, ip.to_string(), 4, tx, 1))
            .unwrap();
        assert_eq!(users.local_count(), 1);
        assert_eq!(users.clones().local_count(ip), 1);

        assert!(users.quit(&uid, "Bye").is_some());
        assert!(users.quit(&uid, "Bye").is_none());
        assert_eq!(users.local_count(), 0);
        assert!(!users.clones().is_tracked(ip));

        let error = rx.try_recv().unwrap();
        assert_eq!(error.command, MessageType::Error);
        assert_eq!(error.trailing.as_deref(), Some("Closing link: (unknown@203.0.113.5) [Bye]"));
    }

    #[test]
    fn test_nick_index_follows_updates() {
        let users = manager();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        users.insert(User::remote("1BBAAAAAA", "bob", "leaf", ip, "h", 1)).unwrap();
        assert!(users.get_by_nick("BOB").is_some());

        users.update("1BBAAAAAA", |user| user.nick = "robert".to_string());
        assert!(users.get_by_nick("bob").is_none());
        assert_eq!(users.get_by_nick("Robert").unwrap().uid, "1BBAAAAAA");
    }

    #[test]
    fn test_dns_completion_ignores_departed_sessions() {
        let users = manager();
        assert!(!users.complete_dns("0AAAAAAAZ", Some("late.example.net".into())));
    }
}
