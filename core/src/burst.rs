//! Network burst
//!
//! When a link comes up, the whole of the local view is sent to the peer in
//! a fixed order. Each phase may refer to identifiers introduced by an
//! earlier one:
//!
//! 1. `BURST <time>` and our `VERSION`
//! 2. servers, depth-first from the root, skipping the peer's own subtree
//! 3. users, each followed by its oper type, away state and metadata
//! 4. channels: `FJOIN` membership, `FMODE` bans, `FTOPIC`, metadata
//! 5. burstable network rules as `ADDLINE`
//! 6. `ENDBURST`
//!
//! Any write failure aborts the burst and is handed back to the caller,
//! which tears the link down. A burst is never resumed, only restarted.

use crate::channel::Channel;
use crate::extensions::ExtensionTarget;
use crate::link::LinkWriter;
use crate::state::ServerState;
use crate::topology::{Topology, TreeServer};
use crate::utils::address;
use crate::xline::{XLine, XLineType};
use crate::{Message, MessageType, Result, User};
use std::sync::Arc;

/// Longest FJOIN line, header included
pub const FJOIN_LINE_BUDGET: usize = 480;

/// Ban payload allowed in one FMODE line
pub const FMODE_BAN_BUDGET: usize = 350;

/// Split a channel's membership into FJOIN lines.
///
/// An empty channel still yields one line so the peer creates it.
pub fn fjoin_lines(sid: &str, channel: &Channel) -> Vec<String> {
    let header = format!(
        ":{} {} {} {} {} :",
        sid,
        MessageType::FJoin,
        channel.name,
        channel.created,
        channel.format_modes()
    );

    let mut lines = Vec::new();
    let mut line = header.clone();
    let mut in_line = 0usize;

    for member in &channel.members {
        let needed = member.modes.len() + 1 + member.uid.len() + 1;
        if line.len() + needed > FJOIN_LINE_BUDGET && in_line > 0 {
            line.pop();
            lines.push(std::mem::replace(&mut line, header.clone()));
            in_line = 0;
        }
        line.push_str(&member.modes);
        line.push(',');
        line.push_str(&member.uid);
        line.push(' ');
        in_line += 1;
    }

    if in_line > 0 || channel.members.is_empty() {
        if in_line > 0 {
            line.pop();
        }
        lines.push(line);
    }
    lines
}

/// Pack a channel's ban list into FMODE lines.
///
/// Each ban costs its length plus two against [`FMODE_BAN_BUDGET`], and no
/// line carries more than `max_modes` bans. A line is flushed before the
/// ban that would overflow it. A ban too long to fit on a line of its own
/// is not sent.
pub fn ban_mode_lines(sid: &str, channel: &Channel, max_modes: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut letters = String::new();
    let mut masks = String::new();
    let mut size = 1usize;

    let flush = |letters: &mut String, masks: &mut String, lines: &mut Vec<String>| {
        lines.push(format!(
            ":{} {} {} {} +{}{}",
            sid,
            MessageType::FMode,
            channel.name,
            channel.created,
            letters,
            masks
        ));
        letters.clear();
        masks.clear();
    };

    for ban in &channel.bans {
        let cost = ban.mask.len() + 2;
        if 1 + cost > FMODE_BAN_BUDGET {
            tracing::warn!("Not bursting oversized ban {} on {}", ban.mask, channel.name);
            continue;
        }
        if !letters.is_empty() && (size + cost > FMODE_BAN_BUDGET || letters.len() >= max_modes) {
            flush(&mut letters, &mut masks, &mut lines);
            size = 1;
        }
        letters.push('b');
        masks.push(' ');
        masks.push_str(&ban.mask);
        size += cost;
    }

    if !letters.is_empty() {
        flush(&mut letters, &mut masks, &mut lines);
    }
    lines
}

/// ADDLINE lines for one rule type. Scanning stops at the first node-local
/// rule; expired timed rules are skipped.
pub fn xline_lines(sid: &str, kind: XLineType, lines: &[XLine], now: i64) -> Vec<String> {
    let mut out = Vec::new();
    for line in lines {
        if !line.burstable {
            break;
        }
        if line.is_expired(now) {
            continue;
        }
        out.push(
            Message::with_prefix(
                sid,
                MessageType::AddLine,
                vec![
                    kind.to_string(),
                    line.displayable(),
                    line.source.clone(),
                    line.set_time.to_string(),
                    line.duration.to_string(),
                ],
            )
            .trailing(line.reason.clone())
            .to_string(),
        );
    }
    out
}

/// UID introduction for a user on the server with SID `sid`
pub fn uid_line(sid: &str, user: &User) -> String {
    let mut params = vec![
        user.uid.clone(),
        user.age.to_string(),
        user.nick.clone(),
        user.host.clone(),
        user.real_host.clone(),
        user.ident.clone(),
        address::ip_string(user.ip),
        user.signon.to_string(),
    ];
    params.extend(user.format_modes().split(' ').map(str::to_string));

    Message::with_prefix(sid, MessageType::Uid, params)
        .trailing(user.realname.clone())
        .to_string()
}

/// Sends full bursts built from a shared [`ServerState`]
pub struct BurstEmitter {
    state: Arc<ServerState>,
}

impl BurstEmitter {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Send a complete burst to the peer `dest_sid`
    pub async fn run_burst(&self, link: &LinkWriter, dest_sid: &str) -> Result<()> {
        self.run_burst_at(link, dest_sid, self.state.now()).await
    }

    /// As [`run_burst`](Self::run_burst) with an explicit clock
    pub async fn run_burst_at(&self, link: &LinkWriter, dest_sid: &str, now: i64) -> Result<()> {
        let sid = self.state.sid().to_string();
        let topology = self.state.topology.read().clone();
        let peer = topology
            .find(dest_sid)
            .map(|server| server.name.clone())
            .unwrap_or_else(|| dest_sid.to_string());

        tracing::info!("Bursting to {}", peer);

        link.send(&Message::with_prefix(&sid, MessageType::Burst, vec![now.to_string()]))?;
        link.send(
            &Message::with_prefix(&sid, MessageType::Version, Vec::new())
                .trailing(self.state.config.server.version.clone()),
        )?;

        self.send_servers(link, &topology, topology.root(), dest_sid, 1)?;
        self.send_users(link, &topology).await?;
        self.send_channels(link, &sid).await?;
        self.send_xlines(link, &sid, now)?;

        for hook in self.state.extensions.hooks() {
            if let Err(e) = hook.on_sync_network(link).await {
                tracing::warn!("Sync hook {} failed during network sync: {}", hook.name(), e);
            }
        }

        link.send(&Message::with_prefix(&sid, MessageType::EndBurst, Vec::new()))?;
        tracing::info!("Finished bursting to {} ({} lines)", peer, link.lines_sent());
        Ok(())
    }

    fn send_servers(
        &self,
        link: &LinkWriter,
        topology: &Topology,
        current: &TreeServer,
        dest_sid: &str,
        hops: u32,
    ) -> Result<()> {
        for child in topology.children(&current.sid) {
            if child.sid == dest_sid {
                continue;
            }
            link.send(
                &Message::with_prefix(
                    &current.name,
                    MessageType::Server,
                    vec![
                        child.name.clone(),
                        "*".to_string(),
                        hops.to_string(),
                        child.sid.clone(),
                    ],
                )
                .trailing(child.description.clone()),
            )?;
            link.send(
                &Message::with_prefix(&child.name, MessageType::Version, Vec::new())
                    .trailing(child.version.clone()),
            )?;
            self.send_servers(link, topology, child, dest_sid, hops + 1)?;
        }
        Ok(())
    }

    async fn send_users(&self, link: &LinkWriter, topology: &Topology) -> Result<()> {
        for user in self.state.users.registered_users() {
            let Some(server) = topology.find_by_name(&user.server) else {
                tracing::debug!("Not bursting {}: server {} unknown", user.uid, user.server);
                continue;
            };

            link.write_line(uid_line(&server.sid, &user))?;
            if let Some(ref oper_type) = user.oper_type {
                link.send(&Message::with_prefix(
                    &user.uid,
                    MessageType::OperType,
                    vec![oper_type.clone()],
                ))?;
            }
            if let Some(ref away) = user.away {
                link.send(
                    &Message::with_prefix(
                        &user.uid,
                        MessageType::Away,
                        vec![away.since.to_string()],
                    )
                    .trailing(away.message.clone()),
                )?;
            }

            for (key, value) in &user.extensions {
                self.send_metadata(link, ExtensionTarget::User, &user.uid, key, value)?;
            }
            for hook in self.state.extensions.hooks() {
                if let Err(e) = hook.on_sync_user(&user, link).await {
                    tracing::warn!("Sync hook {} failed for {}: {}", hook.name(), user.uid, e);
                }
            }
        }
        Ok(())
    }

    async fn send_channels(&self, link: &LinkWriter, sid: &str) -> Result<()> {
        let max_modes = self.state.config.limits.max_modes;
        for channel in self.state.channels.channels() {
            for line in fjoin_lines(sid, &channel) {
                link.write_line(line)?;
            }
            for line in ban_mode_lines(sid, &channel, max_modes) {
                link.write_line(line)?;
            }
            if let Some(ref topic) = channel.topic {
                link.send(
                    &Message::with_prefix(
                        sid,
                        MessageType::FTopic,
                        vec![channel.name.clone(), topic.set_at.to_string(), topic.set_by.clone()],
                    )
                    .trailing(topic.text.clone()),
                )?;
            }

            for (key, value) in &channel.extensions {
                self.send_metadata(link, ExtensionTarget::Channel, &channel.name, key, value)?;
            }
            for hook in self.state.extensions.hooks() {
                if let Err(e) = hook.on_sync_channel(&channel, link).await {
                    tracing::warn!("Sync hook {} failed for {}: {}", hook.name(), channel.name, e);
                }
            }
        }
        Ok(())
    }

    fn send_xlines(&self, link: &LinkWriter, sid: &str, now: i64) -> Result<()> {
        for kind in self.state.xlines.types() {
            for line in xline_lines(sid, kind, &self.state.xlines.lines_of(kind), now) {
                link.write_line(line)?;
            }
        }
        Ok(())
    }

    fn send_metadata(
        &self,
        link: &LinkWriter,
        target: ExtensionTarget,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let Some(value) = self.state.extensions.serialize(target, key, value) else {
            return Ok(());
        };
        link.send(
            &Message::with_prefix(
                self.state.sid(),
                MessageType::Metadata,
                vec![id.to_string(), key.to_string()],
            )
            .trailing(value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BanEntry, Membership};

    fn channel_with(members: usize) -> Channel {
        let mut channel = Channel::new("#rust", 1000);
        channel.modes.insert('n', None);
        channel.modes.insert('t', None);
        for i in 0..members {
            channel.members.push(Membership {
                uid: format!("0AAAAA{:03}", i),
                modes: if i % 3 == 0 { "o".to_string() } else { String::new() },
            });
        }
        channel
    }

    #[test]
    fn test_single_fjoin_line() {
        let lines = fjoin_lines("0AA", &channel_with(2));
        assert_eq!(lines, vec![":0AA FJOIN #rust 1000 +nt :o,0AAAAA000 ,0AAAAA001"]);
    }

    #[test]
    fn test_empty_channel_gets_one_line() {
        let lines = fjoin_lines("0AA", &Channel::new("#x", 5));
        assert_eq!(lines, vec![":0AA FJOIN #x 5 + :"]);
    }

    #[test]
    fn test_fjoin_split_respects_budget() {
        let channel = channel_with(200);
        let lines = fjoin_lines("0AA", &channel);
        assert!(lines.len() > 1);

        let mut seen = Vec::new();
        for line in &lines {
            assert!(line.len() <= FJOIN_LINE_BUDGET, "{} bytes", line.len());
            assert!(line.starts_with(":0AA FJOIN #rust 1000 +nt :"));
            assert!(!line.ends_with(' '));
            let members = line.rsplit_once(" :").unwrap().1;
            seen.extend(members.split(' ').map(|m| m.split_once(',').unwrap().1.to_string()));
        }
        let expected: Vec<_> = channel.members.iter().map(|m| m.uid.clone()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_ban_lines_wrap_at_max_modes() {
        let mut channel = Channel::new("#x", 7);
        for i in 0..5 {
            channel.bans.push(BanEntry {
                mask: format!("*!*@bad{}.example", i),
                set_by: "op".into(),
                set_at: 1,
            });
        }
        let lines = ban_mode_lines("0AA", &channel, 2);
        assert_eq!(
            lines,
            vec![
                ":0AA FMODE #x 7 +bb *!*@bad0.example *!*@bad1.example",
                ":0AA FMODE #x 7 +bb *!*@bad2.example *!*@bad3.example",
                ":0AA FMODE #x 7 +b *!*@bad4.example",
            ]
        );
    }

    #[test]
    fn test_ban_lines_never_drop_the_overflowing_ban() {
        let mut channel = Channel::new("#x", 7);
        for i in 0..10 {
            channel.bans.push(BanEntry {
                mask: format!("*!*@{}{}", "h".repeat(60), i),
                set_by: "op".into(),
                set_at: 1,
            });
        }
        let lines = ban_mode_lines("0AA", &channel, 20);
        let sent: usize = lines
            .iter()
            .map(|line| line.split(' ').nth(4).unwrap().trim_start_matches('+').len())
            .sum();
        assert_eq!(sent, 10);
        assert!(lines.len() >= 2);
        assert!(ban_mode_lines("0AA", &Channel::new("#y", 1), 20).is_empty());
    }

    #[test]
    fn test_oversized_ban_is_not_sent() {
        let mut channel = Channel::new("#x", 7);
        for mask in [format!("*!*@{}", "h".repeat(400)), "*!*@ok.example".to_string()] {
            channel.bans.push(BanEntry {
                mask,
                set_by: "op".into(),
                set_at: 1,
            });
        }
        let lines = ban_mode_lines("0AA", &channel, 20);
        assert_eq!(lines, vec![":0AA FMODE #x 7 +b *!*@ok.example"]);

        channel.bans.truncate(1);
        assert!(ban_mode_lines("0AA", &channel, 20).is_empty());
    }

    #[test]
    fn test_xline_phase_stops_and_skips() {
        let live = XLine::new(XLineType::G, "*@a", "oper", 100, 0, "spam");
        let expired = XLine::new(XLineType::G, "*@b", "oper", 100, 10, "old");
        let mut local = XLine::new(XLineType::G, "*@c", "oper", 100, 0, "local");
        local.burstable = false;
        let after = XLine::new(XLineType::G, "*@d", "oper", 100, 0, "late");

        let lines = xline_lines("0AA", XLineType::G, &[live, expired, local, after], 200);
        assert_eq!(lines, vec![":0AA ADDLINE G *@a oper 100 0 :spam"]);
    }
}
