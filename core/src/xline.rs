//! Network-wide ban and exception rules
//!
//! Rules are grouped by type. Within a type, burstable rules always sit in
//! front of node-local ones; the burst stops scanning a type at the first
//! node-local rule, so the store keeps that partition on every insert.

use crate::bancache::BanCache;
use crate::utils::pattern;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Rule type, ordered by tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum XLineType {
    /// Exception: exempts matching users from bans
    E,
    /// Network-wide user@host ban
    G,
    /// Server-local user@host ban
    K,
    /// Reserved nickname
    Q,
    /// Address ban, checked at accept time
    Z,
}

impl XLineType {
    pub const ALL: [XLineType; 5] = [
        XLineType::E,
        XLineType::G,
        XLineType::K,
        XLineType::Q,
        XLineType::Z,
    ];

    pub fn tag(&self) -> char {
        match self {
            XLineType::E => 'E',
            XLineType::G => 'G',
            XLineType::K => 'K',
            XLineType::Q => 'Q',
            XLineType::Z => 'Z',
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "E" | "e" => Some(XLineType::E),
            "G" | "g" => Some(XLineType::G),
            "K" | "k" => Some(XLineType::K),
            "Q" | "q" => Some(XLineType::Q),
            "Z" | "z" => Some(XLineType::Z),
            _ => None,
        }
    }

    /// K-lines never leave the server that set them
    pub fn default_burstable(&self) -> bool {
        !matches!(self, XLineType::K)
    }

    /// Whether the pattern is an `ident@host` mask
    fn is_user_mask(&self) -> bool {
        matches!(self, XLineType::E | XLineType::G | XLineType::K)
    }
}

impl fmt::Display for XLineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLine {
    pub kind: XLineType,
    /// Match pattern as set
    pub mask: String,
    /// Who set it
    pub source: String,
    pub set_time: i64,
    /// Seconds; 0 is permanent
    pub duration: i64,
    pub reason: String,
    /// Sent to peers during a burst
    pub burstable: bool,
}

impl XLine {
    pub fn new(
        kind: XLineType,
        mask: &str,
        source: &str,
        set_time: i64,
        duration: i64,
        reason: &str,
    ) -> Self {
        Self {
            kind,
            mask: mask.to_string(),
            source: source.to_string(),
            set_time,
            duration,
            reason: reason.to_string(),
            burstable: kind.default_burstable(),
        }
    }

    pub fn expiry(&self) -> i64 {
        self.set_time + self.duration
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.duration != 0 && now > self.expiry()
    }

    /// Pattern in the form sent on the wire
    pub fn displayable(&self) -> String {
        if self.kind.is_user_mask() && !self.mask.contains('@') {
            format!("*@{}", self.mask)
        } else {
            self.mask.clone()
        }
    }

    /// Whether the rule matches a connecting address
    pub fn matches_ip(&self, ip: IpAddr) -> bool {
        match self.kind {
            XLineType::Z => pattern::matches_address(ip, &self.mask),
            XLineType::E | XLineType::G | XLineType::K => {
                let host_mask = self.mask.rsplit('@').next().unwrap_or(&self.mask);
                pattern::matches_address(ip, host_mask)
            }
            XLineType::Q => false,
        }
    }

    /// Whether the rule matches a user by ident, host and address
    pub fn matches_user(&self, ident: &str, host: &str, ip: IpAddr) -> bool {
        match self.kind {
            XLineType::Z => pattern::matches_address(ip, &self.mask),
            XLineType::Q => false,
            _ => pattern::matches_user_mask(&self.displayable(), ident, host, ip),
        }
    }

    /// Quit reason for a user caught by this rule
    pub fn quit_reason(&self) -> String {
        format!("{}-Lined: {}", self.kind, self.reason)
    }
}

/// Rule store
#[derive(Debug, Default)]
pub struct XLineStore {
    lines: RwLock<BTreeMap<XLineType, Vec<XLine>>>,
}

impl XLineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. A second rule with the same type and mask is refused.
    pub fn add(&self, line: XLine) -> Result<()> {
        let mut lines = self.lines.write();
        let entries = lines.entry(line.kind).or_default();

        if entries.iter().any(|existing| existing.mask.eq_ignore_ascii_case(&line.mask)) {
            return Err(Error::Generic(format!(
                "{}-line on {} already exists",
                line.kind, line.mask
            )));
        }

        if line.burstable {
            let at = entries
                .iter()
                .position(|existing| !existing.burstable)
                .unwrap_or(entries.len());
            entries.insert(at, line);
        } else {
            entries.push(line);
        }
        Ok(())
    }

    /// Remove a rule by type and mask
    pub fn delete(&self, kind: XLineType, mask: &str) -> Option<XLine> {
        let mut lines = self.lines.write();
        let entries = lines.get_mut(&kind)?;
        let at = entries.iter().position(|line| line.mask.eq_ignore_ascii_case(mask))?;
        Some(entries.remove(at))
    }

    /// Drop expired rules, returning them
    pub fn expire(&self, now: i64) -> Vec<XLine> {
        let mut expired = Vec::new();
        let mut lines = self.lines.write();
        for entries in lines.values_mut() {
            let (gone, kept): (Vec<XLine>, Vec<XLine>) =
                entries.drain(..).partition(|line| line.is_expired(now));
            *entries = kept;
            expired.extend(gone);
        }
        for line in &expired {
            tracing::info!("Expiring {}-line on {} (set by {})", line.kind, line.mask, line.source);
        }
        expired
    }

    /// Types that currently hold rules, in tag order
    pub fn types(&self) -> Vec<XLineType> {
        self.lines
            .read()
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Rules of one type in stored order
    pub fn lines_of(&self, kind: XLineType) -> Vec<XLine> {
        self.lines.read().get(&kind).cloned().unwrap_or_default()
    }

    /// First live rule of a type matching an address
    pub fn matches_ip(&self, kind: XLineType, ip: IpAddr, now: i64) -> Option<XLine> {
        self.lines
            .read()
            .get(&kind)?
            .iter()
            .find(|line| !line.is_expired(now) && line.matches_ip(ip))
            .cloned()
    }

    /// First live rule of a type matching a user
    pub fn matches_user(
        &self,
        kind: XLineType,
        ident: &str,
        host: &str,
        ip: IpAddr,
        now: i64,
    ) -> Option<XLine> {
        self.lines
            .read()
            .get(&kind)?
            .iter()
            .find(|line| !line.is_expired(now) && line.matches_user(ident, host, ip))
            .cloned()
    }

    /// Wire patterns of a type
    pub fn displayable(&self, kind: XLineType) -> Vec<String> {
        self.lines_of(kind).iter().map(XLine::displayable).collect()
    }

    /// Record the ban against the address and return the quit reason
    pub fn apply(&self, line: &XLine, ip: IpAddr, bancache: &BanCache) -> String {
        let reason = line.quit_reason();
        bancache.add_positive(ip, line.kind.tag(), &reason);
        tracing::debug!("{}-line on {} hit {}", line.kind, line.mask, ip);
        reason
    }

    pub fn len(&self) -> usize {
        self.lines.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
