//! Name-to-index registry.
//!
//! Subsystems reference configured objects by stable small integers instead
//! of variable-length names; the registry keeps the bijection and notifies
//! interested parties about additions, removals and metadata updates.

mod name_index;

pub use name_index::*;
