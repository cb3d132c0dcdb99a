//! Transport handle table
//!
//! Active client transports are looked up by a small integer handle. The
//! table has a fixed capacity; handles are recycled lowest-first. A handle is
//! reserved when the socket is accepted and taken over by its session on
//! registration, so two accepts never share one.

use parking_lot::Mutex;

/// Readiness registration for client transports
pub trait Multiplexer: Send + Sync {
    /// Register `handle` for the session `uid`. False if it cannot be taken.
    fn register(&self, handle: usize, uid: &str) -> bool;

    /// Release a handle, returning the session it belonged to
    fn unregister(&self, handle: usize) -> Option<String>;

    /// Number of handles the table can index
    fn capacity(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Free,
    Reserved,
    Taken(String),
}

/// Fixed-capacity handle table
#[derive(Debug)]
pub struct HandleTable {
    slots: Mutex<Vec<Slot>>,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![Slot::Free; capacity]),
        }
    }

    /// Reserve the lowest free handle. Returns the capacity itself, reserving
    /// nothing, when the table is full.
    pub fn reserve(&self) -> usize {
        let mut slots = self.slots.lock();
        match slots.iter().position(|slot| *slot == Slot::Free) {
            Some(handle) => {
                slots[handle] = Slot::Reserved;
                handle
            }
            None => slots.len(),
        }
    }

    /// Give back a reservation whose connection was never registered.
    /// Registered handles are left alone.
    pub fn release(&self, handle: usize) -> bool {
        match self.slots.lock().get_mut(handle) {
            Some(slot @ Slot::Reserved) => {
                *slot = Slot::Free;
                true
            }
            _ => false,
        }
    }

    /// Session registered at `handle`
    pub fn get(&self, handle: usize) -> Option<String> {
        match self.slots.lock().get(handle) {
            Some(Slot::Taken(uid)) => Some(uid.clone()),
            _ => None,
        }
    }

    /// Handles reserved or registered
    pub fn active(&self) -> usize {
        self.slots.lock().iter().filter(|slot| **slot != Slot::Free).count()
    }
}

impl Multiplexer for HandleTable {
    fn register(&self, handle: usize, uid: &str) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(handle) {
            Some(slot @ (Slot::Free | Slot::Reserved)) => {
                *slot = Slot::Taken(uid.to_string());
                true
            }
            Some(Slot::Taken(owner)) => {
                tracing::warn!("Handle {} already registered to {}", handle, owner);
                false
            }
            None => false,
        }
    }

    fn unregister(&self, handle: usize) -> Option<String> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle)?;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Taken(uid) => Some(uid),
            other => {
                *slot = other;
                None
            }
        }
    }

    fn capacity(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_recycled_lowest_first() {
        let table = HandleTable::new(3);
        assert!(table.register(0, "0AAAAAAAA"));
        assert!(table.register(1, "0AAAAAAAB"));
        assert!(!table.register(1, "0AAAAAAAC"));
        assert_eq!(table.reserve(), 2);

        assert_eq!(table.unregister(0).as_deref(), Some("0AAAAAAAA"));
        assert_eq!(table.reserve(), 0);
        assert_eq!(table.active(), 3);
    }

    #[test]
    fn test_reservations_are_not_shared() {
        let table = HandleTable::new(2);
        let first = table.reserve();
        let second = table.reserve();
        assert_eq!((first, second), (0, 1));
        assert_eq!(table.reserve(), 2);

        assert!(table.register(second, "0AAAAAAAB"));
        assert!(table.register(first, "0AAAAAAAA"));
        assert_eq!(table.get(first).as_deref(), Some("0AAAAAAAA"));
    }

    #[test]
    fn test_release_only_frees_reservations() {
        let table = HandleTable::new(2);
        let reserved = table.reserve();
        assert!(table.unregister(reserved).is_none());
        assert!(table.release(reserved));
        assert!(!table.release(reserved));

        assert!(table.register(0, "0AAAAAAAA"));
        assert!(!table.release(0));
        assert_eq!(table.get(0).as_deref(), Some("0AAAAAAAA"));
    }

    #[test]
    fn test_out_of_range_handles_are_refused() {
        let table = HandleTable::new(1);
        assert!(table.register(0, "0AAAAAAAA"));
        assert_eq!(table.reserve(), 1);
        assert!(!table.register(1, "0AAAAAAAB"));
        assert!(table.unregister(5).is_none());
        assert!(!table.release(5));
        assert_eq!(table.get(0).as_deref(), Some("0AAAAAAAA"));
    }
}
