//! The datasync plugin: lifecycle, wiring, pass-through writes.
//!
//! `SyncPlugin` is constructed with an injected store client and handed to
//! every collaborator that needs it; there is no ambient global instance.
//!
//! ## Example Usage
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use kvsync::{Settings, SyncPlugin, Configurator, KvStore};
//! # async fn example(store: Arc<dyn KvStore>, ifaces: Arc<dyn Configurator>) -> kvsync::Result<()> {
//! let plugin = SyncPlugin::new(Settings::default(), store);
//! plugin.init()?;
//! let registration = plugin.watch("ifplugin", &["/cfg/iface/"], ifaces).await?;
//! // ... run ...
//! registration.trigger_resync().await?;
//! plugin.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{OperationalState, StatusFlag};
use crate::store::KvStore;
use crate::sync::{dispatch_events, Configurator, Registration, Subscription, WatchRegistrar};
use crate::Error;
use crate::Result;
use crate::Settings;

/// Lifecycle states of the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initializing,
    Running,
    Closing,
    Closed,
}

pub struct SyncPlugin {
    settings: Settings,
    store: Arc<dyn KvStore>,
    registrar: Arc<WatchRegistrar>,
    state: Mutex<LifecycleState>,
    cancel: CancellationToken,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
    status: Arc<StatusFlag>,
}

impl SyncPlugin {
    pub fn new(settings: Settings, store: Arc<dyn KvStore>) -> Self {
        let cancel = CancellationToken::new();
        let status = Arc::new(StatusFlag::new());
        let registrar = Arc::new(WatchRegistrar::new(
            store.clone(),
            settings.sync.clone(),
            settings.retry.clone(),
            status.clone(),
            cancel.clone(),
        ));
        Self {
            settings,
            store,
            registrar,
            state: Mutex::new(LifecycleState::Created),
            cancel,
            dispatchers: Mutex::new(Vec::new()),
            status,
        }
    }

    /// Transition `Created -> Initializing -> Running`.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Created => {
                *state = LifecycleState::Initializing;
                *state = LifecycleState::Running;
                self.status.set(OperationalState::Ok);
                info!("sync plugin running");
                Ok(())
            }
            LifecycleState::Closing | LifecycleState::Closed => Err(Error::Stopped),
            _ => Err(Error::Fatal("init() called more than once".to_string())),
        }
    }

    /// Subscribe `name` to `key_prefixes` and pump the resulting event
    /// stream into `configurator`.
    ///
    /// The initial watch and full-state resync complete before this returns;
    /// a failure of either propagates here and leaves no background tasks.
    pub async fn watch(
        &self,
        name: &str,
        key_prefixes: &[&str],
        configurator: Arc<dyn Configurator>,
    ) -> Result<Registration> {
        self.ensure_running()?;

        let Subscription {
            change_rx,
            resync_rx,
            registration,
        } = self.registrar.subscribe(name, key_prefixes).await?;

        let handle = tokio::spawn(dispatch_events(
            name.to_string(),
            change_rx,
            resync_rx,
            configurator,
        ));
        self.dispatchers.lock().push(handle);
        Ok(registration)
    }

    /// Tear down one subscription; its dispatcher drains and exits once the
    /// channels close.
    pub async fn unwatch(&self, name: &str) -> Result<()> {
        self.ensure_running()?;
        self.registrar.unsubscribe(name).await
    }

    /// Administrative full-resync trigger by subscription name.
    pub async fn trigger_resync(&self, name: &str) -> Result<()> {
        self.ensure_running()?;
        self.registrar.trigger_resync(name).await
    }

    /// Write a key through to the store, scoped under the configured
    /// service label.
    pub async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.ensure_running()?;
        let scoped = self.scoped_key(key);
        self.store.put(&scoped, value).await
    }

    /// Delete a key through to the store, scoped under the configured
    /// service label.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_running()?;
        let scoped = self.scoped_key(key);
        self.store.delete(&scoped).await
    }

    /// Transition `Running -> Closing -> Closed`: cancel every worker, wait
    /// for all of them and all dispatchers to exit, then release resources.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Closing | LifecycleState::Closed => return Err(Error::Stopped),
                _ => *state = LifecycleState::Closing,
            }
        }

        self.cancel.cancel();
        self.registrar.close().await;

        let handles = std::mem::take(&mut *self.dispatchers.lock());
        debug!(dispatchers = handles.len(), "draining dispatchers");
        join_all(handles).await;

        *self.state.lock() = LifecycleState::Closed;
        self.status.set(OperationalState::Stopped);
        info!("sync plugin closed");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// False before init, while the backend is flagged unavailable, and
    /// after close.
    pub fn healthy(&self) -> bool {
        self.status.healthy()
    }

    pub fn status(&self) -> OperationalState {
        self.status.get()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registrar.active_count()
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.lock() {
            LifecycleState::Running => Ok(()),
            LifecycleState::Closing | LifecycleState::Closed => Err(Error::Stopped),
            _ => Err(Error::Fatal("plugin is not initialized".to_string())),
        }
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.sync.agent_prefix(), key)
    }
}
