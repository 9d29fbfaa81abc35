//! Apply-side contract of a subsystem configurator.

#[cfg(test)]
use mockall::automock;

use super::{ChangeEvent, ResyncEvent};
use crate::Result;

/// Anything that can turn sync events into subsystem state.
///
/// The dispatcher guarantees that `apply_full_state` for a registration is
/// invoked before any `apply` carrying events from the same registration's
/// resync cycle. An `Err` from either method is logged and skipped; it never
/// stops the event stream.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Configurator: Send + Sync + 'static {
    /// Apply a single incremental change.
    async fn apply(&self, event: ChangeEvent) -> Result<()>;

    /// Replace the subsystem's view with a full snapshot.
    async fn apply_full_state(&self, event: ResyncEvent) -> Result<()>;
}
