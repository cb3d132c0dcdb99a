//! Client sessions

use crate::clones::CloneScope;
use crate::Message;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Registration progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Accepted, NICK/USER not complete
    Pending,
    /// Fully registered; visible to bursts
    Complete,
}

/// Away state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwayState {
    /// When the user went away
    pub since: i64,
    /// Away message
    pub message: String,
}

/// A client session, local or remote
#[derive(Debug, Clone)]
pub struct User {
    /// Network-unique ID (SID + 6 characters)
    pub uid: String,
    /// Nickname
    pub nick: String,
    /// Nick timestamp, used to settle collisions
    pub age: i64,
    /// Host shown to other users
    pub host: String,
    /// Real host
    pub real_host: String,
    /// Ident/username
    pub ident: String,
    /// Address the session connected from
    pub ip: IpAddr,
    /// Port the session connected from
    pub port: u16,
    /// Connect time, kept for WHOWAS
    pub signon: i64,
    /// Modes and their parameters
    pub modes: BTreeMap<char, Option<String>>,
    /// Real name
    pub realname: String,
    /// Oper type, if opered
    pub oper_type: Option<String>,
    /// Away state, if away
    pub away: Option<AwayState>,
    /// Name of the server the session is on
    pub server: String,
    /// Registration progress
    pub registration: Registration,
    /// Extension values keyed by extension name
    pub extensions: BTreeMap<String, String>,
    /// Whether hostname resolution has finished
    pub dns_done: bool,
    /// Matches an exception rule
    pub exempt: bool,
    /// Connect class applied to the session
    pub class: Option<String>,
    /// Transport handle for local sessions
    pub handle: Option<usize>,
    /// Outbound queue for local sessions
    pub sender: Option<mpsc::UnboundedSender<Message>>,
}

impl User {
    /// Create a local session straight after accept
    #[allow(clippy::too_many_arguments)]
    pub fn local(
        uid: String,
        server: &str,
        ip: IpAddr,
        port: u16,
        host: String,
        handle: usize,
        sender: mpsc::UnboundedSender<Message>,
        now: i64,
    ) -> Self {
        Self {
            uid,
            nick: String::new(),
            age: now,
            real_host: host.clone(),
            host,
            ident: String::new(),
            ip,
            port,
            signon: now,
            modes: BTreeMap::new(),
            realname: String::new(),
            oper_type: None,
            away: None,
            server: server.to_string(),
            registration: Registration::Pending,
            extensions: BTreeMap::new(),
            dns_done: false,
            exempt: false,
            class: None,
            handle: Some(handle),
            sender: Some(sender),
        }
    }

    /// Create a session introduced by a peer
    pub fn remote(uid: &str, nick: &str, server: &str, ip: IpAddr, host: &str, now: i64) -> Self {
        Self {
            uid: uid.to_string(),
            nick: nick.to_string(),
            age: now,
            host: host.to_string(),
            real_host: host.to_string(),
            ident: nick.to_lowercase(),
            ip,
            port: 0,
            signon: now,
            modes: BTreeMap::new(),
            realname: String::new(),
            oper_type: None,
            away: None,
            server: server.to_string(),
            registration: Registration::Complete,
            extensions: BTreeMap::new(),
            dns_done: true,
            exempt: false,
            class: None,
            handle: None,
            sender: None,
        }
    }

    /// Whether the session is fully registered
    pub fn is_registered(&self) -> bool {
        self.registration == Registration::Complete
    }

    /// Whether the session is connected to this server
    pub fn is_local(&self) -> bool {
        self.sender.is_some()
    }

    /// Clone counters the session contributes to
    pub fn clone_scope(&self) -> CloneScope {
        if self.is_local() {
            CloneScope::Local
        } else {
            CloneScope::Remote
        }
    }

    pub fn is_oper(&self) -> bool {
        self.oper_type.is_some()
    }

    pub fn is_away(&self) -> bool {
        self.away.is_some()
    }

    /// Mode string with parameters: `+iwk key`
    pub fn format_modes(&self) -> String {
        format_mode_map(&self.modes)
    }

    /// Target used in notices before a nickname is set
    pub fn notice_target(&self) -> &str {
        if self.nick.is_empty() {
            "*"
        } else {
            &self.nick
        }
    }

    /// Queue a message to a local session; remote sessions are ignored
    pub fn send(&self, message: Message) {
        if let Some(ref sender) = self.sender {
            if sender.send(message).is_err() {
                tracing::debug!("Transport for {} already closed", self.uid);
            }
        }
    }
}

/// Render a mode map as `+abc param1 param2`
pub fn format_mode_map(modes: &BTreeMap<char, Option<String>>) -> String {
    let mut letters = String::from("+");
    let mut params = String::new();
    for (mode, param) in modes {
        letters.push(*mode);
        if let Some(param) = param {
            params.push(' ');
            params.push_str(param);
        }
    }
    letters + &params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_modes_puts_params_last() {
        let ip = "192.0.2.1".parse().unwrap();
        let mut user = User::remote("0AAAAAAAB", "alice", "a.example.net", ip, "host", 1);
        assert_eq!(user.format_modes(), "+");

        user.modes.insert('w', None);
        user.modes.insert('i', None);
        user.modes.insert('s', Some("+cC".to_string()));
        assert_eq!(user.format_modes(), "+isw +cC");
    }

    #[test]
    fn test_scope_follows_locality() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let local = User::local("0AAAAAAAA".into(), "hub", ip, 5000, "192.0.2.1".into(), 7, tx, 1);
        assert_eq!(local.clone_scope(), CloneScope::Local);
        assert_eq!(local.notice_target(), "*");

        let remote = User::remote("1BBAAAAAA", "bob", "leaf", ip, "h", 1);
        assert_eq!(remote.clone_scope(), CloneScope::Remote);
    }
}
