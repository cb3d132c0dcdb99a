//! Tree IRC Daemon Core
//!
//! This crate provides the spanning-tree side of an IRC daemon: the network
//! burst sent to a newly linked server, and the admission gate and clone
//! registry every new client connection passes through.

pub mod admission;
pub mod bancache;
pub mod burst;
pub mod channel;
pub mod clones;
pub mod config;
pub mod dns;
pub mod error;
pub mod extensions;
pub mod handles;
pub mod link;
pub mod message;
pub mod policy;
pub mod state;
pub mod topology;
pub mod user;
pub mod users;
pub mod utils;
pub mod xline;

pub use admission::{Admission, AdmissionController, NewConnection, RejectReason};
pub use bancache::{BanCache, BanVerdict};
pub use burst::BurstEmitter;
pub use channel::{BanEntry, Channel, ChannelManager, Membership, Topic};
pub use clones::{CloneRegistry, CloneScope};
pub use config::{ClassKind, Config, ConnectClass};
pub use dns::{HostResolver, SystemResolver};
pub use error::{Error, Result};
pub use extensions::{ExtensionItem, ExtensionRegistry, ExtensionTarget, StringExtItem, SyncHook};
pub use handles::{HandleTable, Multiplexer};
pub use link::{LinkManager, LinkWriter};
pub use message::{Message, MessageType, Prefix};
pub use state::ServerState;
pub use topology::{Topology, TreeServer};
pub use user::{AwayState, Registration, User};
pub use users::UserManager;
pub use xline::{XLine, XLineStore, XLineType};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
