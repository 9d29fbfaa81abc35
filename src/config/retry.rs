use serde::Deserialize;

/// Basic retry policy template
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Divide strategies by business domain
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Re-establishing a lost watch stream (long-lived, patient)
    #[serde(default)]
    pub watch: BackoffPolicy,

    /// Full-state listing during resync (bounded, caller may re-trigger)
    #[serde(default)]
    pub resync: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            watch: BackoffPolicy {
                max_retries: 0, // keep the subscription alive across outages
                timeout_ms: 5000,
                base_delay_ms: 200,
                max_delay_ms: 10000,
            },
            resync: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 5000,
                base_delay_ms: 100,
                max_delay_ms: 2000,
            },
        }
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    5000
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    2000
}
