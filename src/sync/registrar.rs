//! Watch registrar: subscription table and worker lifecycle.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::worker::{boxed_watch_stream, fetch_snapshot, SubscriptionWorker, WorkerCommand};
use super::{ChangeEvent, ResyncEvent};
use crate::errors::{SubscriptionError, SyncError};
use crate::metrics;
use crate::plugin::StatusFlag;
use crate::store::KvStore;
use crate::utils::async_task::retry_with_backoff;
use crate::Error;
use crate::Result;
use crate::RetryPolicies;
use crate::SyncConfig;

/// Handle for one active subscription. Lets the owner trigger an
/// administrative resync or cancel the subscription without going through
/// the registrar. Dropping the handle does not unsubscribe.
#[derive(Debug)]
pub struct Registration {
    name: String,
    control_tx: mpsc::Sender<WorkerCommand>,
    cancel: CancellationToken,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a fresh snapshot-then-replay cycle on this subscription.
    pub async fn trigger_resync(&self) -> Result<()> {
        self.control_tx
            .send(WorkerCommand::ResyncNow)
            .await
            .map_err(|_| SyncError::ChannelClosed(self.name.clone()).into())
    }

    /// Stop the subscription's worker; both event channels close once it
    /// drains, signalling end-of-stream to the consumer, and the name is
    /// released for a new `subscribe`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Receiving side of one subscription, handed to the consumer. The
/// registrar's worker is the only writer; channel closure (not an error) is
/// the termination signal.
#[derive(Debug)]
pub struct Subscription {
    pub change_rx: mpsc::Receiver<ChangeEvent>,
    pub resync_rx: mpsc::Receiver<ResyncEvent>,
    pub registration: Registration,
}

enum SubscriptionEntry {
    /// Name reserved while the initial watch/resync is being established
    Reserved,
    Active(ActiveSubscription),
}

struct ActiveSubscription {
    control_tx: mpsc::Sender<WorkerCommand>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Accepts named interests in key prefixes and owns the resulting
/// subscription workers.
pub struct WatchRegistrar {
    store: Arc<dyn KvStore>,
    sync_cfg: SyncConfig,
    retry: RetryPolicies,
    status: Arc<StatusFlag>,
    cancel: CancellationToken,
    /// Shared with each worker task, which retires its own entry on exit
    /// so a registration cancelled through its handle releases the name.
    subs: Arc<DashMap<String, SubscriptionEntry>>,
}

impl WatchRegistrar {
    pub fn new(
        store: Arc<dyn KvStore>,
        sync_cfg: SyncConfig,
        retry: RetryPolicies,
        status: Arc<StatusFlag>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            sync_cfg,
            retry,
            status,
            cancel,
            subs: Arc::new(DashMap::new()),
        }
    }

    /// Register a named interest in `key_prefixes`.
    ///
    /// Establishes the store watches and completes the initial full-state
    /// resync before returning; both failure modes surface synchronously and
    /// leave no background work behind. On success the returned
    /// [`Subscription`] already holds the initial [`ResyncEvent`].
    pub async fn subscribe(&self, name: &str, key_prefixes: &[&str]) -> Result<Subscription> {
        if name.is_empty() {
            return Err(SubscriptionError::InvalidArgument("empty subscription name".into()).into());
        }
        if key_prefixes.is_empty() || key_prefixes.iter().any(|p| p.is_empty()) {
            return Err(SubscriptionError::InvalidArgument(format!(
                "subscription {name} needs at least one non-empty key prefix"
            ))
            .into());
        }

        // reserve the name before any await so concurrent subscribes race on
        // the map entry, not on the store
        match self.subs.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(SubscriptionError::DuplicateRegistration(name.to_string()).into())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SubscriptionEntry::Reserved);
            }
        }

        let agent_prefix = self.sync_cfg.agent_prefix();
        let scoped: Vec<String> = key_prefixes
            .iter()
            .map(|p| format!("{agent_prefix}{p}"))
            .collect();

        match self.establish(name, scoped).await {
            Ok((subscription, active)) => {
                // upgrade our own reservation only; the registrar may have
                // been closed underneath us while establishing
                let mut pending = Some(active);
                if let Entry::Occupied(mut occupied) = self.subs.entry(name.to_string()) {
                    if matches!(occupied.get(), SubscriptionEntry::Reserved) {
                        if let Some(active) = pending.take() {
                            occupied.insert(SubscriptionEntry::Active(active));
                        }
                    }
                }
                if let Some(orphan) = pending {
                    orphan.cancel.cancel();
                    let _ = orphan.worker.await;
                    warn!(name, "reservation vanished while establishing");
                    return Err(Error::Stopped);
                }
                metrics::ACTIVE_SUBSCRIPTIONS.with_label_values(&[name]).inc();
                info!(name, "subscription established");
                Ok(subscription)
            }
            Err(e) => {
                self.subs.remove(name);
                warn!(name, "subscribe failed: {:?}", e);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        name: &str,
        prefixes: Vec<String>,
    ) -> Result<(Subscription, ActiveSubscription)> {
        // hard failure to establish any initial watch fails the subscribe
        let mut streams = StreamMap::new();
        for prefix in &prefixes {
            let rx = self.store.watch(prefix).await?;
            streams.insert(prefix.clone(), boxed_watch_stream(prefix, rx));
        }

        // initial full-state snapshot, taken after the watches are live so
        // nothing between listing and watching can be missed
        let store = self.store.clone();
        let listing_prefixes = prefixes.clone();
        let (items, revision) = retry_with_backoff(
            "initial_resync",
            self.retry.resync,
            &self.cancel,
            move || {
                let store = store.clone();
                let prefixes = listing_prefixes.clone();
                async move { fetch_snapshot(store, prefixes).await }
            },
        )
        .await
        .map_err(|e| match e {
            Error::Stopped => Error::Stopped,
            other => SyncError::ResyncFailed {
                name: name.to_string(),
                reason: other.to_string(),
            }
            .into(),
        })?;

        let (change_tx, change_rx) = mpsc::channel(self.sync_cfg.change_buffer_size);
        // capacity 1: at most one outstanding snapshot per subscription
        let (resync_tx, resync_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::channel(4);
        let token = self.cancel.child_token();

        // seed the stream: the initial snapshot precedes every change event
        resync_tx
            .try_send(ResyncEvent {
                name: name.to_string(),
                items,
                revision,
            })
            .map_err(|_| SyncError::ChannelClosed(name.to_string()))?;

        let worker = SubscriptionWorker::new(
            name.to_string(),
            prefixes,
            self.store.clone(),
            streams,
            change_tx,
            resync_tx,
            control_rx,
            token.clone(),
            self.retry.clone(),
            self.status.clone(),
            revision,
            self.sync_cfg.resync_interval_secs,
        );
        // the worker retires its own entry on exit; unsubscribe and close
        // remove the entry first and skip this
        let subs = Arc::clone(&self.subs);
        let owner = name.to_string();
        let handle = tokio::spawn(async move {
            worker.run().await;
            let retired = subs.remove_if(owner.as_str(), |_, entry| {
                matches!(entry, SubscriptionEntry::Active(_))
            });
            if retired.is_some() {
                metrics::ACTIVE_SUBSCRIPTIONS.with_label_values(&[owner.as_str()]).dec();
                debug!(name = %owner, "subscription retired");
            }
        });

        let registration = Registration {
            name: name.to_string(),
            control_tx: control_tx.clone(),
            cancel: token.clone(),
        };
        Ok((
            Subscription {
                change_rx,
                resync_rx,
                registration,
            },
            ActiveSubscription {
                control_tx,
                cancel: token,
                worker: handle,
            },
        ))
    }

    /// Tear down the named subscription; waits for its worker to exit so
    /// both channels are closed when this returns.
    ///
    /// Only established subscriptions count: a reservation held by a
    /// still-running `subscribe` for the same name is not removable.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        let removed = self
            .subs
            .remove_if(name, |_, entry| matches!(entry, SubscriptionEntry::Active(_)));
        let Some((_, SubscriptionEntry::Active(active))) = removed else {
            return Err(SubscriptionError::NotFound(name.to_string()).into());
        };
        active.cancel.cancel();
        let _ = active.worker.await;
        metrics::ACTIVE_SUBSCRIPTIONS.with_label_values(&[name]).dec();
        info!(name, "subscription removed");
        Ok(())
    }

    /// Administrative resync trigger by subscription name.
    pub async fn trigger_resync(&self, name: &str) -> Result<()> {
        let control_tx = match self.subs.get(name).as_deref() {
            Some(SubscriptionEntry::Active(active)) => active.control_tx.clone(),
            _ => return Err(SubscriptionError::NotFound(name.to_string()).into()),
        };
        control_tx
            .send(WorkerCommand::ResyncNow)
            .await
            .map_err(|_| SyncError::ChannelClosed(name.to_string()).into())
    }

    pub fn active_count(&self) -> usize {
        self.subs.len()
    }

    /// Cancel every subscription and wait for all workers to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let names: Vec<String> = self.subs.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::new();
        for name in names {
            if let Some((name, SubscriptionEntry::Active(active))) = self.subs.remove(&name) {
                metrics::ACTIVE_SUBSCRIPTIONS.with_label_values(&[name.as_str()]).dec();
                handles.push(active.worker);
            }
        }
        futures::future::join_all(handles).await;
        debug!("watch registrar closed");
    }
}
