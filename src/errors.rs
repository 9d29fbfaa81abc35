//! Datasync Error Hierarchy
//!
//! Defines error types for the watch-and-resync core, categorized by the
//! layer they originate from: registry, subscription management, the sync
//! event pipeline, and the backing key-value store.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name-to-index registry failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Watch subscription management failures
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Failures inside the watch/resync event pipeline
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Backing key-value store failures
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration loading / validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation attempted after the plugin has been closed
    #[error("Plugin is stopped")]
    Stopped,

    /// Unrecoverable failures requiring the caller to tear down
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registration under a name that is already taken
    #[error("Name already registered: {0}")]
    AlreadyExists(String),

    /// Lookup or unregister on an absent entry
    #[error("Name not registered: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// Bad subscribe parameters (empty name, no prefixes)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Subscribe under a name that already has an active subscription
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Unsubscribe or resync trigger on an unknown subscription
    #[error("No active subscription named: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Full listing of the subscribed prefixes could not be completed.
    /// Transient; the registration stays usable and the caller may retry.
    #[error("Resync failed for {name}: {reason}")]
    ResyncFailed { name: String, reason: String },

    /// The consumer side of a subscription channel is gone
    #[error("Subscription channel closed: {0}")]
    ChannelClosed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transient store connectivity loss; retried internally with backoff
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a watch prefix outright; fatal to the subscribe call
    #[error("Invalid key prefix: {0}")]
    InvalidPrefix(String),

    /// An established watch stream ended unexpectedly
    #[error("Watch stream lost for prefix: {0}")]
    WatchLost(String),
}
