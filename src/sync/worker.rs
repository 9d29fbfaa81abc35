//! Per-subscription background worker.
//!
//! The worker owns the store watch streams of one subscription and is the
//! only writer to its change/resync channels. It forwards incremental
//! changes, performs snapshot-then-replay resyncs, and re-establishes lost
//! watch streams with backoff. It exits when cancellation fires or the
//! consumer side of a channel is gone; both channels close on exit, which is
//! the end-of-stream signal to the dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ChangeEvent, ResyncEvent};
use crate::errors::{BackendError, SyncError};
use crate::metrics;
use crate::plugin::StatusFlag;
use crate::store::{KvStore, WatchStream, WatchUpdate};
use crate::utils::async_task::retry_with_backoff;
use crate::Error;
use crate::Result;
use crate::RetryPolicies;

/// Control messages from the registration handle to its worker
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Run a full snapshot-then-replay resync now
    ResyncNow,
}

/// Wrap a raw store watch stream so that silent closure becomes an
/// observable in-stream fault the worker can react to.
pub(crate) fn boxed_watch_stream(prefix: &str, rx: WatchStream) -> BoxStream<'static, WatchUpdate> {
    let lost = prefix.to_string();
    ReceiverStream::new(rx)
        .chain(stream::once(async move {
            Err(BackendError::WatchLost(lost))
        }))
        .boxed()
}

/// Merge full listings of all `prefixes` into one keyed snapshot.
///
/// The snapshot revision is the highest revision any single listing was
/// taken at; change events at or below it are already reflected.
pub(crate) async fn fetch_snapshot(
    store: Arc<dyn KvStore>,
    prefixes: Vec<String>,
) -> Result<(BTreeMap<String, Bytes>, u64)> {
    let mut items = BTreeMap::new();
    let mut revision = 0u64;
    for prefix in &prefixes {
        let snapshot = store.list_under_prefix(prefix).await?;
        revision = revision.max(snapshot.revision);
        for kv in snapshot.items {
            items.insert(kv.key, kv.value);
        }
    }
    Ok((items, revision))
}

pub(crate) struct SubscriptionWorker {
    name: String,
    prefixes: Vec<String>,
    store: Arc<dyn KvStore>,
    streams: StreamMap<String, BoxStream<'static, WatchUpdate>>,
    change_tx: mpsc::Sender<ChangeEvent>,
    resync_tx: mpsc::Sender<ResyncEvent>,
    control_rx: mpsc::Receiver<WorkerCommand>,
    control_open: bool,
    cancel: CancellationToken,
    retry: RetryPolicies,
    status: Arc<StatusFlag>,
    /// Store revision of the last delivered snapshot; change events at or
    /// below it are covered by that snapshot and must not be re-delivered.
    resync_floor: u64,
    resync_interval: Option<Duration>,
    pending_faults: Vec<(String, BackendError)>,
    pending_resync: bool,
}

impl SubscriptionWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        prefixes: Vec<String>,
        store: Arc<dyn KvStore>,
        streams: StreamMap<String, BoxStream<'static, WatchUpdate>>,
        change_tx: mpsc::Sender<ChangeEvent>,
        resync_tx: mpsc::Sender<ResyncEvent>,
        control_rx: mpsc::Receiver<WorkerCommand>,
        cancel: CancellationToken,
        retry: RetryPolicies,
        status: Arc<StatusFlag>,
        resync_floor: u64,
        resync_interval_secs: u64,
    ) -> Self {
        Self {
            name,
            prefixes,
            store,
            streams,
            change_tx,
            resync_tx,
            control_rx,
            control_open: true,
            cancel,
            retry,
            status,
            resync_floor,
            resync_interval: (resync_interval_secs > 0)
                .then(|| Duration::from_secs(resync_interval_secs)),
            pending_faults: Vec::new(),
            pending_resync: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(name = %self.name, prefixes = ?self.prefixes, "subscription worker started");

        let mut ticker = self.resync_interval.map(|period| {
            let mut t = interval(period);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t
        });
        if let Some(t) = ticker.as_mut() {
            // the first tick resolves immediately; the initial resync already ran
            t.tick().await;
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Some((prefix, fault)) = self.pending_faults.pop() {
                if self.reconnect(prefix, fault).await.is_err() {
                    break;
                }
                continue;
            }

            if self.pending_resync {
                self.pending_resync = false;
                if self.resync().await.is_err() {
                    break;
                }
                continue;
            }

            let control_open = self.control_open;
            let streams_active = !self.streams.is_empty();
            let periodic = ticker.is_some();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                cmd = self.control_rx.recv(), if control_open => match cmd {
                    Some(WorkerCommand::ResyncNow) => self.pending_resync = true,
                    // registration handle dropped; the subscription stays alive
                    None => self.control_open = false,
                },
                _ = async { ticker.as_mut().expect("ticker").tick().await }, if periodic => {
                    trace!(name = %self.name, "periodic resync due");
                    self.pending_resync = true;
                }
                Some((prefix, update)) = self.streams.next(), if streams_active => match update {
                    Ok(event) => {
                        if self.forward(event).await.is_err() {
                            break;
                        }
                    }
                    Err(fault) => self.pending_faults.push((prefix, fault)),
                },
            }
        }

        debug!(name = %self.name, "subscription worker stopped");
    }

    /// Forward one incremental change, dropping anything already covered by
    /// the last delivered snapshot.
    async fn forward(&mut self, event: ChangeEvent) -> Result<()> {
        if event.revision <= self.resync_floor {
            trace!(
                name = %self.name,
                key = %event.key,
                revision = event.revision,
                floor = self.resync_floor,
                "change covered by snapshot, skipping"
            );
            return Ok(());
        }
        self.change_tx
            .send(event)
            .await
            .map_err(|_| SyncError::ChannelClosed(self.name.clone()).into())
    }

    /// Snapshot-then-replay: changes arriving while the listing runs are
    /// buffered and released only after the resync event has been delivered.
    async fn resync(&mut self) -> Result<()> {
        debug!(name = %self.name, "starting full resync");

        let store = self.store.clone();
        let prefixes = self.prefixes.clone();
        let policy = self.retry.resync;
        let cancel = self.cancel.clone();
        let listing = retry_with_backoff("resync_listing", policy, &cancel, move || {
            let store = store.clone();
            let prefixes = prefixes.clone();
            async move { fetch_snapshot(store, prefixes).await }
        });
        tokio::pin!(listing);

        let mut buffered: Vec<ChangeEvent> = Vec::new();
        let mut faults: Vec<(String, BackendError)> = Vec::new();
        let outcome = loop {
            let streams_active = !self.streams.is_empty();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Stopped),
                res = &mut listing => break res,
                Some((prefix, update)) = self.streams.next(), if streams_active => match update {
                    Ok(event) => buffered.push(event),
                    Err(fault) => faults.push((prefix, fault)),
                },
            }
        };

        match outcome {
            Ok((items, revision)) => {
                self.resync_floor = revision;
                self.resync_tx
                    .send(ResyncEvent {
                        name: self.name.clone(),
                        items,
                        revision,
                    })
                    .await
                    .map_err(|_| SyncError::ChannelClosed(self.name.clone()))?;
                metrics::RESYNCS_PERFORMED.with_label_values(&[self.name.as_str()]).inc();
                info!(name = %self.name, revision, "resync delivered");
            }
            Err(Error::Stopped) => return Err(Error::Stopped),
            Err(e) => {
                // transient: the registration stays usable, the previous
                // snapshot remains the floor and buffered changes still flow
                error!(name = %self.name, "resync failed: {:?}", e);
                metrics::RESYNCS_FAILED.with_label_values(&[self.name.as_str()]).inc();
            }
        }

        for event in buffered {
            self.forward(event).await?;
        }
        self.pending_faults.extend(faults);
        Ok(())
    }

    /// Re-establish a lost watch stream, then schedule a fresh resync to
    /// cover anything that changed during the outage.
    async fn reconnect(&mut self, prefix: String, fault: BackendError) -> Result<()> {
        warn!(name = %self.name, prefix = %prefix, "watch stream lost: {:?}", fault);
        self.status.mark_backend_down();
        self.streams.remove(&prefix);

        loop {
            let store = self.store.clone();
            let p = prefix.clone();
            let attempt = retry_with_backoff("watch_reestablish", self.retry.watch, &self.cancel, move || {
                let store = store.clone();
                let p = p.clone();
                async move { store.watch(&p).await }
            })
            .await;

            match attempt {
                Ok(stream) => {
                    self.streams.insert(prefix.clone(), boxed_watch_stream(&prefix, stream));
                    break;
                }
                Err(Error::Stopped) => return Err(Error::Stopped),
                Err(e) => {
                    // stay unhealthy and keep trying; the subscription
                    // channels must remain open across backend outages
                    error!(name = %self.name, prefix = %prefix, "watch retries exhausted: {:?}", e);
                }
            }
        }

        metrics::WATCH_RECONNECTS.with_label_values(&[self.name.as_str()]).inc();
        self.status.mark_backend_up();
        info!(name = %self.name, prefix = %prefix, "watch stream re-established");
        self.pending_resync = true;
        Ok(())
    }
}
