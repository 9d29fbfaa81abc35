//! Plugin lifecycle management.
//!
//! Owns the cancellation token and the background tasks of the sync core,
//! and guarantees an orderly, blocking drain-and-stop on shutdown.

mod status;
mod sync_plugin;

pub use status::*;
pub use sync_plugin::*;
