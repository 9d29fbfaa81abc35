use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use crate::sync::{ChangeEvent, Configurator, ResyncEvent};
use crate::Error;
use crate::Result;

#[derive(Debug, Clone)]
pub enum Applied {
    Full(ResyncEvent),
    Change(ChangeEvent),
}

/// Configurator that records everything applied to it, with optional
/// per-key rejection for error-isolation tests.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Applied>>,
    reject_keys: Mutex<HashSet<String>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `apply` fail for this key from now on.
    pub fn reject_key(&self, key: &str) {
        self.reject_keys.lock().insert(key.to_string());
    }

    pub fn events(&self) -> Vec<Applied> {
        self.events.lock().clone()
    }

    pub fn change_events(&self) -> Vec<ChangeEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Applied::Change(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn resync_events(&self) -> Vec<ResyncEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Applied::Full(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Poll until `pred` holds over the applied events. Panics after two
    /// seconds; only meant for tests.
    pub async fn wait_until<F>(&self, pred: F)
    where
        F: Fn(&[Applied]) -> bool,
    {
        for _ in 0..400 {
            if pred(&self.events.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("recorder condition not met within 2s; saw {:?}", self.events());
    }

    pub async fn wait_for_changes(&self, count: usize) {
        self.wait_until(|events| {
            events
                .iter()
                .filter(|e| matches!(e, Applied::Change(_)))
                .count()
                >= count
        })
        .await;
    }

    pub async fn wait_for_resyncs(&self, count: usize) {
        self.wait_until(|events| {
            events
                .iter()
                .filter(|e| matches!(e, Applied::Full(_)))
                .count()
                >= count
        })
        .await;
    }
}

#[async_trait::async_trait]
impl Configurator for Recorder {
    async fn apply(&self, event: ChangeEvent) -> Result<()> {
        if self.reject_keys.lock().contains(&event.key) {
            return Err(Error::Fatal(format!("rejected key {}", event.key)));
        }
        self.events.lock().push(Applied::Change(event));
        Ok(())
    }

    async fn apply_full_state(&self, event: ResyncEvent) -> Result<()> {
        self.events.lock().push(Applied::Full(event));
        Ok(())
    }
}
