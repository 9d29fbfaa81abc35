//! Contract of the backing key-value store.
//!
//! The sync core is agnostic to the store's wire protocol; it only needs the
//! four primitives below. A concrete client (etcd, consul, ...) implements
//! [`KvStore`] and is injected into the plugin at construction time.

use bytes::Bytes;
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

use crate::errors::BackendError;
use crate::sync::ChangeEvent;
use crate::Result;

/// One key/value pair of a snapshot, tagged with the revision at which the
/// value was last written.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
}

/// Full listing of one key prefix at a single point in time.
///
/// `revision` is the store-wide revision the listing was taken at; change
/// events at or below it are already reflected in `items`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub items: Vec<KeyValue>,
    pub revision: u64,
}

/// One update delivered on a watch stream. In-stream `Err` signals a
/// transient backend fault; the stream closing means the watch is gone and
/// must be re-established.
pub type WatchUpdate = std::result::Result<ChangeEvent, BackendError>;

/// Receiving half of a store watch. Dropping it cancels the watch.
pub type WatchStream = mpsc::Receiver<WatchUpdate>;

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Write a single key.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Remove a single key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List the current content of all keys under `prefix`.
    async fn list_under_prefix(&self, prefix: &str) -> Result<Snapshot>;

    /// Open a change stream for all keys under `prefix`.
    ///
    /// A hard failure (e.g. invalid prefix syntax) is returned synchronously;
    /// transient faults after establishment travel inside the stream.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;
}
