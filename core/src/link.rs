//! Server-to-server links
//!
//! A [`LinkWriter`] buffers outgoing lines for one peer; a flush task drains
//! them to the socket. Once a link is closed no further line is accepted, so
//! nothing is ever written to a torn-down transport.

use crate::burst::BurstEmitter;
use crate::state::ServerState;
use crate::topology::TreeServer;
use crate::{Error, Message, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Line writer for one peer
#[derive(Debug)]
pub struct LinkWriter {
    id: Uuid,
    peer: String,
    sender: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    lines_sent: AtomicU64,
}

impl LinkWriter {
    /// Create a writer and the receiving end its flush task reads from
    pub fn new(peer: &str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = Self {
            id: Uuid::new_v4(),
            peer: peer.to_string(),
            sender,
            closed: AtomicBool::new(false),
            lines_sent: AtomicU64::new(0),
        };
        (writer, receiver)
    }

    /// Queue one line, without CR/LF
    pub fn write_line(&self, line: impl Into<String>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::LinkClosed(self.peer.clone()));
        }
        self.sender
            .send(line.into())
            .map_err(|_| Error::Link(format!("Transport to {} has gone away", self.peer)))?;
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn send(&self, message: &Message) -> Result<()> {
        self.write_line(message.to_string())
    }

    /// Refuse all further writes
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closed link writer for {}", self.peer);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.sender.is_closed()
    }

    /// Unique per connection, so a stale writer is never mistaken for a new
    /// link to the same server
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn lines_sent(&self) -> u64 {
        self.lines_sent.load(Ordering::Relaxed)
    }
}

/// Drain queued lines to a transport until every writer is dropped
pub async fn flush_lines<W>(
    mut receiver: mpsc::UnboundedReceiver<String>,
    mut transport: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = receiver.recv().await {
        transport.write_all(line.as_bytes()).await?;
        transport.write_all(b"\r\n").await?;
        transport.flush().await?;
    }
    Ok(())
}

/// Active links by peer SID
pub struct LinkManager {
    state: Arc<ServerState>,
    links: DashMap<String, Arc<LinkWriter>>,
}

impl LinkManager {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            links: DashMap::new(),
        }
    }

    /// Attach a directly connected peer below the local server and send it a
    /// full burst. A failed burst severs the link again.
    pub async fn establish(&self, peer: TreeServer, writer: Arc<LinkWriter>) -> Result<()> {
        let sid = peer.sid.clone();
        let name = peer.name.clone();
        {
            let mut topology = self.state.topology.write();
            let root = topology.root().sid.clone();
            topology.add_server(&root, peer)?;
        }
        self.links.insert(sid.clone(), writer.clone());
        tracing::info!("Link established with {} ({})", name, sid);

        let emitter = BurstEmitter::new(self.state.clone());
        if let Err(e) = emitter.run_burst(&writer, &sid).await {
            tracing::warn!("Burst to {} failed: {}", name, e);
            if let Err(sever_err) = self.sever(&sid, &format!("Burst failed: {}", e)) {
                tracing::error!("Failed to sever {} after burst failure: {}", name, sever_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Tear a link down: close its writer, drop the peer's subtree from the
    /// topology and quit every user behind it
    pub fn sever(&self, sid: &str, reason: &str) -> Result<Vec<TreeServer>> {
        if let Some((_, writer)) = self.links.remove(sid) {
            writer.close();
        }

        let removed = self.state.topology.write().remove_server(sid)?;
        let names: Vec<String> = removed.iter().map(|server| server.name.clone()).collect();
        let split_reason = match names.first() {
            Some(peer) => format!("{} {}", self.state.config.server.name, peer),
            None => reason.to_string(),
        };

        let quit = self.state.users.remove_server_users(&names, &split_reason);
        for user in &quit {
            self.state.channels.remove_user(&user.uid);
        }

        tracing::info!(
            "Severed link to {} ({} servers, {} users lost): {}",
            sid,
            removed.len(),
            quit.len(),
            reason
        );
        Ok(removed)
    }

    pub fn get(&self, sid: &str) -> Option<Arc<LinkWriter>> {
        self.links.get(sid).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_writer_refuses_lines() {
        let (writer, mut receiver) = LinkWriter::new("leaf.example.net");
        writer.write_line(":0AA BURST 1").unwrap();
        writer.close();

        assert!(matches!(writer.write_line(":0AA ENDBURST"), Err(Error::LinkClosed(_))));
        assert_eq!(receiver.try_recv().unwrap(), ":0AA BURST 1");
        assert!(receiver.try_recv().is_err());
        assert_eq!(writer.lines_sent(), 1);
    }

    #[test]
    fn test_dropped_transport_is_a_link_error() {
        let (writer, receiver) = LinkWriter::new("leaf.example.net");
        drop(receiver);
        assert!(writer.write_line("x").is_err());
    }

    #[tokio::test]
    async fn test_flush_appends_crlf() {
        let (writer, receiver) = LinkWriter::new("leaf.example.net");
        writer.write_line(":0AA BURST 1").unwrap();
        writer.write_line(":0AA ENDBURST").unwrap();
        drop(writer);

        let mut out = Vec::new();
        flush_lines(receiver, &mut out).await.unwrap();
        assert_eq!(out, b":0AA BURST 1\r\n:0AA ENDBURST\r\n");
    }
}
