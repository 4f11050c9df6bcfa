//! Provider registry — which peer serves which content tag, and where.
//!
//! A fixed table of REGISTRY_CAPACITY slots owned by the index. Every
//! operation is a linear scan in slot order, and that order is observable:
//! registration takes the first free slot, and search breaks use-count ties
//! in favour of the lowest slot.

use stash_core::wire::REGISTRY_CAPACITY;

/// One advertised (peer, content) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub peer: String,
    pub content: String,
    pub ip: String,
    pub port: u16,
    /// Times this entry has been handed out by search.
    pub use_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("empty field or zero port")]
    InvalidEntry,
    #[error("peer {peer:?} already registered {content:?}")]
    Duplicate { peer: String, content: String },
    #[error("registry full ({} entries)", REGISTRY_CAPACITY)]
    TableFull,
    #[error("no matching entry")]
    NotFound,
}

/// The index's provider table.
pub struct Registry {
    slots: Vec<Option<RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(REGISTRY_CAPACITY)
    }

    /// A registry with a non-standard slot count. Used by tests.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Register a provider in the first free slot. Returns the slot index.
    pub fn register(
        &mut self,
        peer: &str,
        content: &str,
        ip: &str,
        port: u16,
    ) -> Result<usize, RegistryError> {
        if peer.is_empty() || content.is_empty() || ip.is_empty() || port == 0 {
            return Err(RegistryError::InvalidEntry);
        }
        if self.position(peer, content).is_some() {
            return Err(RegistryError::Duplicate {
                peer: peer.to_string(),
                content: content.to_string(),
            });
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(RegistryError::TableFull)?;

        self.slots[slot] = Some(RegistryEntry {
            peer: peer.to_string(),
            content: content.to_string(),
            ip: ip.to_string(),
            port,
            use_count: 0,
        });
        Ok(slot)
    }

    /// Pick the least-used provider of `content` and charge it one use.
    ///
    /// Ties go to the lowest slot. The returned entry shows the count as it
    /// was when selected.
    pub fn search(&mut self, content: &str) -> Result<RegistryEntry, RegistryError> {
        if content.is_empty() {
            return Err(RegistryError::InvalidEntry);
        }

        let mut selected: Option<&mut RegistryEntry> = None;
        for entry in self.slots.iter_mut().flatten() {
            if entry.content != content {
                continue;
            }
            // strict < keeps the first entry seen on a tie
            if selected.as_ref().map_or(true, |best| entry.use_count < best.use_count) {
                selected = Some(entry);
            }
        }

        let entry = selected.ok_or(RegistryError::NotFound)?;
        let chosen = entry.clone();
        entry.use_count = entry.use_count.saturating_add(1);
        Ok(chosen)
    }

    /// Remove the exact (peer, content) entry.
    pub fn deregister(&mut self, peer: &str, content: &str) -> Result<RegistryEntry, RegistryError> {
        let slot = self
            .position(peer, content)
            .ok_or(RegistryError::NotFound)?;
        self.slots[slot].take().ok_or(RegistryError::NotFound)
    }

    /// All in-use entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> + '_ {
        self.slots.iter().flatten()
    }

    fn position(&self, peer: &str, content: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|e| e.peer == peer && e.content == content)
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
