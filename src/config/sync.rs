use serde::Deserialize;

/// Watch / resync pipeline parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Instance label; all subscribed prefixes and pass-through writes are
    /// scoped under `/vnf-agent/<service_label>/`. Empty label disables
    /// key-space scoping.
    #[serde(default)]
    pub service_label: String,

    /// Per-subscription change channel buffer
    #[serde(default = "default_change_buffer_size")]
    pub change_buffer_size: usize,

    /// Periodic full-resync interval in seconds (0 disables the timer;
    /// the initial resync after subscribe always runs)
    #[serde(default)]
    pub resync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            service_label: String::new(),
            change_buffer_size: default_change_buffer_size(),
            resync_interval_secs: 0,
        }
    }
}

impl SyncConfig {
    /// Key-space prefix derived from the service label, e.g.
    /// `/vnf-agent/vpp1/`. Empty when no label is configured.
    pub fn agent_prefix(&self) -> String {
        if self.service_label.is_empty() {
            String::new()
        } else {
            format!("/vnf-agent/{}/", self.service_label)
        }
    }
}

fn default_change_buffer_size() -> usize {
    256
}
