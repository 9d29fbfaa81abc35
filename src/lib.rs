mod config;
mod errors;
pub mod metrics;
mod plugin;
mod registry;
mod store;
mod sync;
mod utils;

pub use config::*;
pub use errors::*;
pub use plugin::*;
pub use registry::*;
pub use store::*;
pub use sync::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
