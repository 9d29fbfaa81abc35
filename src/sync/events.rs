//! Event types flowing from the store to subsystem configurators.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Kind of change carried by a [`ChangeEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Key was inserted or updated
    Put,
    /// Key was explicitly deleted
    Delete,
}

/// Incremental notification that a single key's value was set or removed.
///
/// Invariant: for a given key, revisions of consecutive events delivered to
/// any one subscriber are strictly increasing.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The key that changed
    pub key: String,
    /// The new value (empty for Delete events)
    pub value: Bytes,
    /// The value before the change, when the store provides it
    pub previous: Option<Bytes>,
    /// Type of change
    pub op: Operation,
    /// Store-assigned monotonically increasing sequence number
    pub revision: u64,
}

/// Full current content of a subscription's prefixes at one point in time.
///
/// Exactly one resync event is produced per registration per resync cycle.
/// The mapping is complete: omission of a previously-known key means that
/// key was deleted.
#[derive(Debug, Clone)]
pub struct ResyncEvent {
    /// The registration name this snapshot targets
    pub name: String,
    /// Key to value, covering all subscribed prefixes
    pub items: BTreeMap<String, Bytes>,
    /// Store revision the snapshot was taken at
    pub revision: u64,
}
