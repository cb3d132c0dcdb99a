//! Channels and the channel store

use crate::user::format_mode_map;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Channel topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// A channel member and its prefix modes (`o`, `v`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub uid: String,
    pub modes: String,
}

/// An entry in a channel's ban list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel record
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel name, case preserved
    pub name: String,
    /// Creation timestamp; the older side wins a merge
    pub created: i64,
    /// Modes and their parameters
    pub modes: BTreeMap<char, Option<String>>,
    pub topic: Option<Topic>,
    /// Members in join order
    pub members: Vec<Membership>,
    pub bans: Vec<BanEntry>,
    /// Extension values keyed by extension name
    pub extensions: BTreeMap<String, String>,
}

impl Channel {
    pub fn new(name: &str, created: i64) -> Self {
        Self {
            name: name.to_string(),
            created,
            modes: BTreeMap::new(),
            topic: None,
            members: Vec::new(),
            bans: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Mode string with parameters, always at least `+`
    pub fn format_modes(&self) -> String {
        format_mode_map(&self.modes)
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.members.iter().any(|member| member.uid == uid)
    }

    /// Channels marked `+P` survive losing their last member
    pub fn is_permanent(&self) -> bool {
        self.modes.contains_key(&'P')
    }
}

/// Channel store keyed by lowercased name
#[derive(Debug, Default)]
pub struct ChannelManager {
    channels: RwLock<BTreeMap<String, Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel. Returns false if it already exists.
    pub fn create(&self, name: &str, created: i64) -> bool {
        let mut channels = self.channels.write();
        let key = name.to_lowercase();
        if channels.contains_key(&key) {
            return false;
        }
        channels.insert(key, Channel::new(name, created));
        true
    }

    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.read().get(&name.to_lowercase()).cloned()
    }

    /// Apply a change to a stored channel
    pub fn update<F>(&self, name: &str, change: F) -> bool
    where
        F: FnOnce(&mut Channel),
    {
        match self.channels.write().get_mut(&name.to_lowercase()) {
            Some(channel) => {
                change(channel);
                true
            }
            None => false,
        }
    }

    /// Add a member, creating the channel at `now` if needed. Returns false
    /// if the user was already a member.
    pub fn join(&self, name: &str, uid: &str, modes: &str, now: i64) -> bool {
        let mut channels = self.channels.write();
        let channel = channels
            .entry(name.to_lowercase())
            .or_insert_with(|| Channel::new(name, now));
        if channel.is_member(uid) {
            return false;
        }
        channel.members.push(Membership {
            uid: uid.to_string(),
            modes: modes.to_string(),
        });
        true
    }

    /// Remove a member; an emptied channel is destroyed unless permanent
    pub fn part(&self, name: &str, uid: &str) -> bool {
        let mut channels = self.channels.write();
        let key = name.to_lowercase();
        let Some(channel) = channels.get_mut(&key) else {
            return false;
        };
        let before = channel.members.len();
        channel.members.retain(|member| member.uid != uid);
        let removed = channel.members.len() != before;

        if removed && channel.members.is_empty() && !channel.is_permanent() {
            channels.remove(&key);
            tracing::debug!("Channel {} destroyed", name);
        }
        removed
    }

    /// Remove a user from every channel it is in
    pub fn remove_user(&self, uid: &str) {
        let mut channels = self.channels.write();
        channels.retain(|_, channel| {
            let before = channel.members.len();
            channel.members.retain(|member| member.uid != uid);
            channel.members.len() == before || !channel.members.is_empty() || channel.is_permanent()
        });
    }

    pub fn set_topic(&self, name: &str, text: &str, set_by: &str, set_at: i64) -> bool {
        self.update(name, |channel| {
            channel.topic = if text.is_empty() {
                None
            } else {
                Some(Topic {
                    text: text.to_string(),
                    set_by: set_by.to_string(),
                    set_at,
                })
            };
        })
    }

    /// Add a ban. Returns false for a missing channel or a duplicate mask.
    pub fn add_ban(&self, name: &str, mask: &str, set_by: &str, set_at: i64) -> bool {
        let mut added = false;
        self.update(name, |channel| {
            if channel.bans.iter().any(|ban| ban.mask.eq_ignore_ascii_case(mask)) {
                return;
            }
            channel.bans.push(BanEntry {
                mask: mask.to_string(),
                set_by: set_by.to_string(),
                set_at,
            });
            added = true;
        });
        added
    }

    /// Snapshot of every channel, ordered by name
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_part() {
        let channels = ChannelManager::new();
        assert!(channels.join("#Rust", "0AAAAAAAA", "o", 100));
        assert!(!channels.join("#rust", "0AAAAAAAA", "", 200));
        assert!(channels.join("#rust", "0AAAAAAAB", "", 200));

        let channel = channels.get("#RUST").unwrap();
        assert_eq!(channel.name, "#Rust");
        assert_eq!(channel.created, 100);
        assert_eq!(channel.members.len(), 2);

        assert!(channels.part("#rust", "0AAAAAAAA"));
        assert!(channels.part("#rust", "0AAAAAAAB"));
        assert!(channels.get("#rust").is_none());
    }

    #[test]
    fn test_permanent_channel_survives_empty() {
        let channels = ChannelManager::new();
        channels.join("#keep", "0AAAAAAAA", "", 1);
        channels.update("#keep", |channel| {
            channel.modes.insert('P', None);
        });
        channels.remove_user("0AAAAAAAA");
        assert!(channels.get("#keep").unwrap().members.is_empty());
    }

    #[test]
    fn test_created_channel_can_stay_empty() {
        let channels = ChannelManager::new();
        assert!(channels.create("#x", 5));
        assert!(!channels.create("#X", 6));
        channels.remove_user("0AAAAAAAA");
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn test_bans_and_topic() {
        let channels = ChannelManager::new();
        channels.create("#x", 5);
        assert!(channels.add_ban("#x", "*!*@bad.host", "op", 10));
        assert!(!channels.add_ban("#x", "*!*@BAD.host", "op", 11));
        assert!(!channels.add_ban("#missing", "*!*@a", "op", 11));

        channels.set_topic("#x", "hello", "op!o@h", 12);
        assert_eq!(channels.get("#x").unwrap().topic.unwrap().text, "hello");
        channels.set_topic("#x", "", "op!o@h", 13);
        assert!(channels.get("#x").unwrap().topic.is_none());
        assert_eq!(channels.get("#x").unwrap().format_modes(), "+");
    }
}
