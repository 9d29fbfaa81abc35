//! Single ordered consumer loop per subscription.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{ChangeEvent, Configurator, ResyncEvent};
use crate::metrics;

/// Drain one subscription's channels into its configurator.
///
/// The select is biased with the resync arm first: the worker enqueues each
/// snapshot before releasing the changes it gates, so the bias turns that
/// producer-side ordering into resync-before-change delivery.
///
/// A configurator error is logged and skipped; a single bad event never
/// stops synchronization of the other keys. The loop terminates exactly when
/// both input channels are closed and drained, so shutdown (which stops the
/// worker and thereby closes the channels) never discards buffered events.
pub async fn dispatch_events(
    name: String,
    mut change_rx: mpsc::Receiver<ChangeEvent>,
    mut resync_rx: mpsc::Receiver<ResyncEvent>,
    configurator: Arc<dyn Configurator>,
) {
    debug!(name = %name, "dispatcher started");

    loop {
        tokio::select! {
            biased;
            Some(resync) = resync_rx.recv() => {
                trace!(name = %name, revision = resync.revision, "dispatching full state");
                if let Err(e) = configurator.apply_full_state(resync).await {
                    metrics::APPLY_FAILURES.with_label_values(&[name.as_str()]).inc();
                    warn!(name = %name, "configurator rejected full state: {:?}", e);
                }
            }
            Some(change) = change_rx.recv() => {
                trace!(
                    name = %name,
                    key = %change.key,
                    revision = change.revision,
                    "dispatching change"
                );
                metrics::CHANGE_EVENTS_DISPATCHED.with_label_values(&[name.as_str()]).inc();
                if let Err(e) = configurator.apply(change).await {
                    metrics::APPLY_FAILURES.with_label_values(&[name.as_str()]).inc();
                    warn!(name = %name, "configurator rejected change: {:?}", e);
                }
            }
            else => break,
        }
    }

    debug!(name = %name, "dispatcher stopped");
}
