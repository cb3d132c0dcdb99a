//! Extension metadata and burst sync hooks
//!
//! Users and channels carry raw extension values keyed by name. An
//! [`ExtensionItem`] registered under that name decides what, if anything,
//! is sent to peers. [`SyncHook`]s let other components add their own lines
//! after each user or channel is introduced, and once more before the burst
//! ends.

use crate::channel::Channel;
use crate::link::LinkWriter;
use crate::{Result, User};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// What an extension value is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionTarget {
    User,
    Channel,
}

/// Serializer for one extension key
pub trait ExtensionItem: Send + Sync {
    /// Extension key
    fn name(&self) -> &str;

    /// Value to send to peers. `None` or an empty string means nothing is sent.
    fn serialize(&self, target: ExtensionTarget, value: &str) -> Option<String>;
}

/// Sends the stored value as-is
#[derive(Debug, Clone)]
pub struct StringExtItem {
    name: String,
    targets: Vec<ExtensionTarget>,
}

impl StringExtItem {
    pub fn new(name: &str, targets: &[ExtensionTarget]) -> Self {
        Self {
            name: name.to_string(),
            targets: targets.to_vec(),
        }
    }
}

impl ExtensionItem for StringExtItem {
    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, target: ExtensionTarget, value: &str) -> Option<String> {
        self.targets.contains(&target).then(|| value.to_string())
    }
}

/// Called while a burst is in progress
#[async_trait]
pub trait SyncHook: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &str;

    /// After a user and its metadata have been sent
    async fn on_sync_user(&self, _user: &User, _link: &LinkWriter) -> Result<()> {
        Ok(())
    }

    /// After a channel and its metadata have been sent
    async fn on_sync_channel(&self, _channel: &Channel, _link: &LinkWriter) -> Result<()> {
        Ok(())
    }

    /// After all network rules, before the end marker
    async fn on_sync_network(&self, _link: &LinkWriter) -> Result<()> {
        Ok(())
    }
}

/// Registered extension items and sync hooks
#[derive(Default)]
pub struct ExtensionRegistry {
    items: RwLock<HashMap<String, Arc<dyn ExtensionItem>>>,
    hooks: RwLock<Vec<Arc<dyn SyncHook>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serializer; replaces any item with the same name
    pub fn register_item(&self, item: Arc<dyn ExtensionItem>) {
        let name = item.name().to_string();
        if self.items.write().insert(name.clone(), item).is_some() {
            tracing::warn!("Extension item {} replaced", name);
        }
    }

    pub fn unregister_item(&self, name: &str) -> bool {
        self.items.write().remove(name).is_some()
    }

    pub fn register_hook(&self, hook: Arc<dyn SyncHook>) {
        tracing::debug!("Registered sync hook {}", hook.name());
        self.hooks.write().push(hook);
    }

    /// Serialized value for a key, `None` when the key is unknown or the
    /// serializer has nothing to send
    pub fn serialize(&self, target: ExtensionTarget, key: &str, value: &str) -> Option<String> {
        let item = self.items.read().get(key).cloned()?;
        item.serialize(target, value).filter(|serialized| !serialized.is_empty())
    }

    /// Snapshot of the registered hooks, in registration order
    pub fn hooks(&self) -> Vec<Arc<dyn SyncHook>> {
        self.hooks.read().clone()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("items", &self.items.read().keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_and_empty_values_are_skipped() {
        let registry = ExtensionRegistry::new();
        registry.register_item(Arc::new(StringExtItem::new(
            "accountname",
            &[ExtensionTarget::User],
        )));

        assert_eq!(
            registry.serialize(ExtensionTarget::User, "accountname", "alice"),
            Some("alice".to_string())
        );
        assert_eq!(registry.serialize(ExtensionTarget::User, "accountname", ""), None);
        assert_eq!(registry.serialize(ExtensionTarget::Channel, "accountname", "alice"), None);
        assert_eq!(registry.serialize(ExtensionTarget::User, "swhois", "x"), None);

        assert!(registry.unregister_item("accountname"));
        assert_eq!(registry.serialize(ExtensionTarget::User, "accountname", "alice"), None);
    }

    struct Silent;

    impl SyncHook for Silent {
        fn name(&self) -> &str {
            "silent"
        }
    }

    #[test]
    fn test_default_hooks_write_nothing() {
        let registry = ExtensionRegistry::new();
        registry.register_hook(Arc::new(Silent));
        let (link, mut receiver) = LinkWriter::new("peer.example.net");

        for hook in registry.hooks() {
            tokio_test::block_on(hook.on_sync_network(&link)).unwrap();
        }
        assert!(receiver.try_recv().is_err());
        assert_eq!(registry.hooks().len(), 1);
    }
}
