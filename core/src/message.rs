//! IRC wire lines
//!
//! Positional-argument grammar as defined in RFC 1459, with the server-to-server
//! verbs used during a network burst.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message prefix: a server name, a SID or a UID. Burst lines never carry
/// `nick!user@host` prefixes so the source is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix(pub String);

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IRC message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    // Client-facing
    Nick,
    User,
    Quit,
    Ping,
    Pong,
    Notice,
    Error,

    // Server-to-server burst
    Burst,
    EndBurst,
    Server,
    Version,
    Uid,
    OperType,
    Away,
    Metadata,
    FJoin,
    FMode,
    FTopic,
    AddLine,

    // Custom/unknown
    Custom(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Nick => "NICK",
            MessageType::User => "USER",
            MessageType::Quit => "QUIT",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Notice => "NOTICE",
            MessageType::Error => "ERROR",
            MessageType::Burst => "BURST",
            MessageType::EndBurst => "ENDBURST",
            MessageType::Server => "SERVER",
            MessageType::Version => "VERSION",
            MessageType::Uid => "UID",
            MessageType::OperType => "OPERTYPE",
            MessageType::Away => "AWAY",
            MessageType::Metadata => "METADATA",
            MessageType::FJoin => "FJOIN",
            MessageType::FMode => "FMODE",
            MessageType::FTopic => "FTOPIC",
            MessageType::AddLine => "ADDLINE",
            MessageType::Custom(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "NICK" => MessageType::Nick,
            "USER" => MessageType::User,
            "QUIT" => MessageType::Quit,
            "PING" => MessageType::Ping,
            "PONG" => MessageType::Pong,
            "NOTICE" => MessageType::Notice,
            "ERROR" => MessageType::Error,
            "BURST" => MessageType::Burst,
            "ENDBURST" => MessageType::EndBurst,
            "SERVER" => MessageType::Server,
            "VERSION" => MessageType::Version,
            "UID" => MessageType::Uid,
            "OPERTYPE" => MessageType::OperType,
            "AWAY" => MessageType::Away,
            "METADATA" => MessageType::Metadata,
            "FJOIN" => MessageType::FJoin,
            "FMODE" => MessageType::FMode,
            "FTOPIC" => MessageType::FTopic,
            "ADDLINE" => MessageType::AddLine,
            _ => MessageType::Custom(s.to_string()),
        }
    }
}

/// One wire line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Optional source
    pub prefix: Option<Prefix>,
    /// Message command/type
    pub command: MessageType,
    /// Middle parameters (no spaces, never start with ':')
    pub params: Vec<String>,
    /// Final parameter, always rendered after a ':'
    pub trailing: Option<String>,
}

impl Message {
    /// Create a new message
    pub fn new(command: MessageType, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
            trailing: None,
        }
    }

    /// Create a new message with prefix
    pub fn with_prefix(
        prefix: impl Into<String>,
        command: MessageType,
        params: Vec<String>,
    ) -> Self {
        Self {
            prefix: Some(Prefix(prefix.into())),
            command,
            params,
            trailing: None,
        }
    }

    /// Attach the trailing parameter
    pub fn trailing(mut self, text: impl Into<String>) -> Self {
        self.trailing = Some(text.into());
        self
    }

    /// Set the source prefix
    pub fn source(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(Prefix(prefix.into()));
        self
    }

    /// Server notice to a client that may not have a nickname yet
    pub fn notice(target: &str, text: impl Into<String>) -> Self {
        Self::new(MessageType::Notice, vec![target.to_string()]).trailing(text)
    }

    /// All parameters in order, trailing last
    pub fn all_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .map(String::as_str)
            .chain(self.trailing.as_deref())
            .collect()
    }

    /// Parse a single line (CR/LF already stripped or not)
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut rest = input.trim_end_matches(['\r', '\n']).trim_start();
        if rest.is_empty() {
            return Err(crate::Error::MessageParse("Empty message".to_string()));
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (source, tail) = stripped
                .split_once(' ')
                .ok_or_else(|| crate::Error::MessageParse("No command found".to_string()))?;
            rest = tail.trim_start();
            Some(Prefix(source.to_string()))
        } else {
            None
        };

        let (middle, trailing) = match rest.find(" :") {
            Some(pos) => (&rest[..pos], Some(rest[pos + 2..].to_string())),
            None => (rest, None),
        };

        let mut words = middle.split_whitespace();
        let command = words
            .next()
            .map(MessageType::from)
            .ok_or_else(|| crate::Error::MessageParse("No command found".to_string()))?;
        let params = words.map(str::to_string).collect();

        Ok(Message {
            prefix,
            command,
            params,
            trailing,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        if let Some(ref trailing) = self.trailing {
            write!(f, " :{}", trailing)?;
        }
        Ok(())
    }
}
