//! The watch-and-resync core.
//!
//! A subscription binds a name to a set of key prefixes in the backing
//! store. For each subscription the registrar runs one background worker
//! that merges the store's incremental watch streams with full-state resync
//! snapshots into a single ordered pair of channels, and one dispatcher that
//! drains those channels into a [`Configurator`].
//!
//! Ordering obligations, per subscription:
//! - exactly one [`ResyncEvent`] precedes the first [`ChangeEvent`] of every
//!   resync cycle — a configurator never sees an incremental change for a
//!   key before the full state containing (or not containing) that key;
//! - per-key change events are delivered in strictly increasing revision
//!   order. No guarantee exists across different keys or subscriptions.

mod configurator;
mod dispatcher;
mod events;
mod registrar;
mod worker;

pub use configurator::*;
pub use dispatcher::*;
pub use events::*;
pub use registrar::*;
