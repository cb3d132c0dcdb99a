//! Shared server state
//!
//! One [`ServerState`] owns every store the burst and the admission gate
//! read from. It is built once from the configuration and handed around as
//! an `Arc`.

use crate::bancache::BanCache;
use crate::channel::ChannelManager;
use crate::clones::CloneRegistry;
use crate::extensions::ExtensionRegistry;
use crate::topology::{Topology, TreeServer};
use crate::users::UserManager;
use crate::xline::XLineStore;
use crate::{Config, User};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub topology: RwLock<Topology>,
    pub users: UserManager,
    pub channels: ChannelManager,
    pub xlines: XLineStore,
    pub bancache: BanCache,
    pub extensions: ExtensionRegistry,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let local = TreeServer::new(
            &config.server.sid,
            &config.server.name,
            &config.server.description,
            &config.server.version,
        );
        let clones = Arc::new(CloneRegistry::new());

        Self {
            topology: RwLock::new(Topology::new(local)),
            users: UserManager::new(&config.server.sid, clones),
            channels: ChannelManager::new(),
            xlines: XLineStore::new(),
            bancache: BanCache::new(Duration::from_secs(config.security.bancache_ttl_seconds)),
            extensions: ExtensionRegistry::new(),
            config,
        }
    }

    pub fn sid(&self) -> &str {
        &self.config.server.sid
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    pub fn clones(&self) -> &CloneRegistry {
        self.users.clones()
    }

    /// Current time in seconds
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Quit a user and drop it from every channel
    pub fn quit_user(&self, uid: &str, reason: &str) -> Option<User> {
        let user = self.users.quit(uid, reason)?;
        self.channels.remove_user(uid);
        Some(user)
    }

    /// Periodic housekeeping: expire network rules and stale ban verdicts
    pub fn expire(&self) {
        let now = self.now();
        for line in self.xlines.expire(now) {
            self.bancache.remove_type(line.kind.tag());
        }
        self.bancache.prune();
    }
}
