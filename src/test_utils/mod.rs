//! Shared fixtures: an in-memory store with fault injection and a recording
//! configurator.

mod mem_store;
mod recorder;

pub use mem_store::*;
pub use recorder::*;
