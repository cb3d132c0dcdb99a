//! Configuration management

use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

lazy_static! {
    static ref SID_PATTERN: Regex = Regex::new(r"^[0-9][0-9A-Z]{2}$").unwrap();
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server information
    pub server: ServerConfig,
    /// Connection limits
    pub limits: LimitsConfig,
    /// Security settings
    pub security: SecurityConfig,
    /// Listener settings
    pub connection: ConnectionConfig,
    /// Connect classes, first match wins
    pub classes: Vec<ConnectClass>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name
    pub name: String,
    /// Server ID, unique on the network
    pub sid: String,
    /// Server description
    pub description: String,
    /// Software/protocol version string sent during burst
    pub version: String,
    /// Network name
    pub network: String,
}

/// Connection limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Local connection count above which new clients are refused
    pub soft_limit: usize,
    /// Absolute cap on local clients regardless of the soft limit
    pub max_clients: usize,
    /// Capacity of the handle table; handles at or above it are refused
    pub max_descriptors: usize,
    /// Maximum ban flags per FMODE line
    pub max_modes: usize,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Resolve client hostnames
    pub enable_dns: bool,
    /// Notice sent to a client refused by a cached ban
    pub ban_notice: Option<String>,
    /// Lifetime of ban cache verdicts
    pub bancache_ttl_seconds: u64,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bind address
    pub bind_address: String,
    /// Client ports
    pub ports: Vec<u16>,
}

/// Whether a matching class admits or refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    Allow,
    Deny,
}

/// Connect class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectClass {
    /// Class name
    pub name: String,
    /// Allow or deny
    pub kind: ClassKind,
    /// Wildcard (`203.0.113.*`) or CIDR (`203.0.113.0/24`) address pattern
    pub host: String,
    /// Only match connections on this local port
    #[serde(default)]
    pub port: Option<u16>,
    /// Per-address clones on this server, 0 for unlimited
    #[serde(default)]
    pub max_local: u64,
    /// Per-address clones on the whole network, 0 for unlimited
    #[serde(default)]
    pub max_global: u64,
    /// Ping frequency in seconds
    #[serde(default = "default_ping_frequency")]
    pub ping_frequency: u64,
    /// Maximum send queue in bytes
    #[serde(default = "default_sendq")]
    pub sendq: usize,
    /// Maximum receive queue in bytes
    #[serde(default = "default_recvq")]
    pub recvq: usize,
    /// Seconds allowed to complete registration
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout: u64,
}

fn default_ping_frequency() -> u64 {
    120
}

fn default_sendq() -> usize {
    262144
}

fn default_recvq() -> usize {
    8192
}

fn default_registration_timeout() -> u64 {
    90
}

impl ConnectClass {
    /// Allow class with default settings
    pub fn allow(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ClassKind::Allow,
            host: host.to_string(),
            port: None,
            max_local: 0,
            max_global: 0,
            ping_frequency: default_ping_frequency(),
            sendq: default_sendq(),
            recvq: default_recvq(),
            registration_timeout: default_registration_timeout(),
        }
    }

    /// Deny class
    pub fn deny(name: &str, host: &str) -> Self {
        Self {
            kind: ClassKind::Deny,
            ..Self::allow(name, host)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            security: SecurityConfig::default(),
            connection: ConnectionConfig::default(),
            classes: vec![ConnectClass::allow("default", "*")],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "irc.example.net".to_string(),
            sid: "0AA".to_string(),
            description: "Tree IRC Daemon".to_string(),
            version: format!("treeircd-{}", env!("CARGO_PKG_VERSION")),
            network: "ExampleNet".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            soft_limit: 1000,
            max_clients: 4096,
            max_descriptors: 65536,
            max_modes: 20,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_dns: true,
            ban_notice: None,
            bancache_ttl_seconds: 86400,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ports: vec![6667],
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        if config.classes.is_empty() {
            tracing::debug!("No connect classes configured, allowing all addresses");
            config.classes.push(ConnectClass::allow("default", "*"));
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(Error::Config("Server name cannot be empty".to_string()));
        }

        if !SID_PATTERN.is_match(&self.server.sid) {
            return Err(Error::Config(format!(
                "Invalid server ID {}: must be a digit followed by two digits or uppercase letters",
                self.server.sid
            )));
        }

        if self.limits.soft_limit == 0 {
            return Err(Error::Config("Soft limit must be greater than 0".to_string()));
        }

        if self.limits.max_descriptors == 0 {
            return Err(Error::Config("Max descriptors must be greater than 0".to_string()));
        }

        if self.limits.max_modes == 0 {
            return Err(Error::Config("Max modes must be greater than 0".to_string()));
        }

        if self.limits.soft_limit > self.limits.max_clients {
            tracing::warn!(
                "Soft limit {} exceeds max_clients {}; the hard cap applies first",
                self.limits.soft_limit,
                self.limits.max_clients
            );
        }

        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.name.to_lowercase()) {
                return Err(Error::Config(format!("Duplicate connect class: {}", class.name)));
            }
            if class.host.is_empty() {
                return Err(Error::Config(format!(
                    "Connect class {} has an empty host",
                    class.name
                )));
            }
        }

        Ok(())
    }

    /// Connect class by name
    pub fn get_class(&self, name: &str) -> Option<&ConnectClass> {
        self.classes.iter().find(|class| class.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_sid() {
        let mut config = Config::default();
        config.server.sid = "AAA".to_string();
        assert!(config.validate().is_err());

        config.server.sid = "0a1".to_string();
        assert!(config.validate().is_err());

        config.server.sid = "9ZZ".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_duplicate_classes() {
        let mut config = Config::default();
        config.classes = vec![
            ConnectClass::allow("users", "*"),
            ConnectClass::deny("Users", "10.*"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip_fills_default_class() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treeircd.toml");
        std::fs::write(
            &path,
            "[server]\nname = \"hub.example.net\"\nsid = \"1HB\"\n\n[limits]\nsoft_limit = 10\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.name, "hub.example.net");
        assert_eq!(config.limits.soft_limit, 10);
        assert_eq!(config.limits.max_modes, 20);
        assert_eq!(config.classes.len(), 1);
        assert!(config.validate().is_ok());

        let out = dir.path().join("written.toml");
        config.to_file(&out).unwrap();
        let reread = Config::from_file(&out).unwrap();
        assert_eq!(reread.server.sid, "1HB");
    }
}
