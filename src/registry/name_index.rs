use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::errors::RegistryError;

/// Kind of registry mutation reported to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    Registered,
    Unregistered,
    Updated,
}

/// Notification delivered to passive registry watchers
#[derive(Debug, Clone)]
pub struct IndexChangeEvent<M> {
    pub name: String,
    pub index: u32,
    pub change: IndexChange,
    pub metadata: M,
}

#[derive(Debug, Clone)]
struct IndexEntry<M> {
    name: String,
    metadata: M,
}

struct Inner<M> {
    by_name: HashMap<String, u32>,
    by_index: HashMap<u32, IndexEntry<M>>,
    /// Next index to hand out. Starts at 1; index 0 is reserved as
    /// "not found" and is never assigned. Indexes are never reused within
    /// one registry instance, even after unregistration.
    next_index: u32,
    watchers: Vec<mpsc::UnboundedSender<IndexChangeEvent<M>>>,
}

/// Bidirectional name↔index mapping with change notification.
///
/// Both maps are kept consistent under a single write lock; readers never
/// observe a half-updated pair. Metadata is opaque to the registry.
pub struct NameIndexRegistry<M> {
    inner: RwLock<Inner<M>>,
}

impl<M> Default for NameIndexRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> NameIndexRegistry<M> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_name: HashMap::new(),
                by_index: HashMap::new(),
                next_index: 1,
                watchers: Vec::new(),
            }),
        }
    }
}

impl<M> NameIndexRegistry<M>
where
    M: Clone + Send + 'static,
{
    /// Allocate the next unused index for `name`.
    pub fn register(&self, name: &str, metadata: M) -> Result<u32, RegistryError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }

        let index = inner.next_index;
        inner.next_index += 1;
        inner.by_name.insert(name.to_string(), index);
        inner.by_index.insert(
            index,
            IndexEntry {
                name: name.to_string(),
                metadata: metadata.clone(),
            },
        );

        trace!(name, index, "registry entry added");
        Self::notify(&mut inner, name, index, IndexChange::Registered, metadata);
        Ok(index)
    }

    /// Remove both mapping directions; returns the index the name held.
    pub fn unregister(&self, name: &str) -> Result<u32, RegistryError> {
        let mut inner = self.inner.write();
        let index = inner
            .by_name
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let entry = inner
            .by_index
            .remove(&index)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        trace!(name, index, "registry entry removed");
        Self::notify(&mut inner, name, index, IndexChange::Unregistered, entry.metadata);
        Ok(index)
    }

    /// Replace the metadata attached to an existing entry.
    pub fn update_metadata(&self, name: &str, metadata: M) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let index = *inner
            .by_name
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if let Some(entry) = inner.by_index.get_mut(&index) {
            entry.metadata = metadata.clone();
        }

        Self::notify(&mut inner, name, index, IndexChange::Updated, metadata);
        Ok(())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn lookup_by_index(&self, index: u32) -> Option<(String, M)> {
        self.inner
            .read()
            .by_index
            .get(&index)
            .map(|entry| (entry.name.clone(), entry.metadata.clone()))
    }

    /// Passive subscription to additions/removals/updates.
    pub fn watch_changes(&self) -> mpsc::UnboundedReceiver<IndexChangeEvent<M>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().watchers.push(tx);
        rx
    }

    /// Drop every entry. Indexes already handed out stay burned; the
    /// counter is not rewound.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.by_index.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(inner: &mut Inner<M>, name: &str, index: u32, change: IndexChange, metadata: M) {
        inner.watchers.retain(|tx| {
            tx.send(IndexChangeEvent {
                name: name.to_string(),
                index,
                change,
                metadata: metadata.clone(),
            })
            .is_ok()
        });
    }
}
