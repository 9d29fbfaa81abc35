use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::BackendError;
use crate::store::{KeyValue, KvStore, Snapshot, WatchStream, WatchUpdate};
use crate::sync::{ChangeEvent, Operation};
use crate::Result;

struct MemWatcher {
    prefix: String,
    tx: mpsc::Sender<WatchUpdate>,
}

struct MemInner {
    /// key -> (value, revision of last write)
    data: BTreeMap<String, (Bytes, u64)>,
    revision: u64,
    watchers: Vec<MemWatcher>,
    fail_next_watch: bool,
    watch_failing: bool,
    list_delay: Option<Duration>,
}

/// In-memory [`KvStore`] with revision tracking, prefix watches and fault
/// injection. Events are fanned out under the data lock via `try_send`, so
/// watchers observe writes in revision order.
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemInner {
                data: BTreeMap::new(),
                revision: 0,
                watchers: Vec::new(),
                fail_next_watch: false,
                watch_failing: false,
                list_delay: None,
            }),
        }
    }

    /// Current store-wide revision.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Fail the next `watch()` call synchronously, as a store would reject
    /// an invalid prefix.
    pub fn fail_next_watch(&self) {
        self.inner.lock().fail_next_watch = true;
    }

    /// While set, every `watch()` call fails with a transient error. Lets a
    /// test hold the store in an outage for as long as it needs.
    pub fn set_watch_failing(&self, failing: bool) {
        self.inner.lock().watch_failing = failing;
    }

    /// Delay every listing, keeping a subscribe's initial snapshot in
    /// flight long enough for a test to race other calls against it.
    pub fn set_list_delay(&self, delay: Duration) {
        self.inner.lock().list_delay = Some(delay);
    }

    /// Simulate a transient backend outage: every live watch stream gets an
    /// in-stream error and is then closed. Subsequent `watch()` calls
    /// succeed again.
    pub fn break_watches(&self) {
        let watchers = std::mem::take(&mut self.inner.lock().watchers);
        for watcher in watchers {
            let _ = watcher
                .tx
                .try_send(Err(BackendError::Unavailable("injected outage".to_string())));
            // sender drops here, ending the stream
        }
    }

    pub fn watcher_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }
}

#[async_trait::async_trait]
impl KvStore for MemStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let previous = inner
            .data
            .insert(key.to_string(), (value.clone(), revision))
            .map(|(v, _)| v);

        let event = ChangeEvent {
            key: key.to_string(),
            value,
            previous,
            op: Operation::Put,
            revision,
        };
        inner.watchers.retain(|w| {
            if key.starts_with(&w.prefix) {
                w.tx.try_send(Ok(event.clone())).is_ok()
            } else {
                true
            }
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some((previous, _)) = inner.data.remove(key) else {
            return Ok(());
        };
        inner.revision += 1;
        let revision = inner.revision;

        let event = ChangeEvent {
            key: key.to_string(),
            value: Bytes::new(),
            previous: Some(previous),
            op: Operation::Delete,
            revision,
        };
        inner.watchers.retain(|w| {
            if key.starts_with(&w.prefix) {
                w.tx.try_send(Ok(event.clone())).is_ok()
            } else {
                true
            }
        });
        Ok(())
    }

    async fn list_under_prefix(&self, prefix: &str) -> Result<Snapshot> {
        let delay = self.inner.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock();
        let items = inner
            .data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, revision))| KeyValue {
                key: key.clone(),
                value: value.clone(),
                revision: *revision,
            })
            .collect();
        Ok(Snapshot {
            items,
            revision: inner.revision,
        })
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let mut inner = self.inner.lock();
        if inner.fail_next_watch {
            inner.fail_next_watch = false;
            return Err(BackendError::InvalidPrefix(prefix.to_string()).into());
        }
        if inner.watch_failing {
            return Err(BackendError::Unavailable("injected outage".to_string()).into());
        }
        let (tx, rx) = mpsc::channel(64);
        inner.watchers.push(MemWatcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
