//! Prometheus metrics for the sync pipeline.
//!
//! No HTTP exporter is wired up here; embedders scrape [`REGISTRY`] through
//! whatever surface they already run.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    pub static ref CHANGE_EVENTS_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kvsync_change_events_dispatched",
            "Change events forwarded to configurators"
        ),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref APPLY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kvsync_apply_failures",
            "Events rejected by a configurator (logged and skipped)"
        ),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref RESYNCS_PERFORMED: IntCounterVec = IntCounterVec::new(
        Opts::new("kvsync_resyncs_performed", "Completed full-state resyncs"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref RESYNCS_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("kvsync_resyncs_failed", "Resync cycles that gave up after retries"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_RECONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kvsync_watch_reconnects",
            "Watch streams re-established after a backend fault"
        ),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("kvsync_active_subscriptions", "Currently active watch subscriptions"),
        &["name"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Register all sync metrics with [`REGISTRY`]. Call once at startup.
pub fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(CHANGE_EVENTS_DISPATCHED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(APPLY_FAILURES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(RESYNCS_PERFORMED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(RESYNCS_FAILED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(WATCH_RECONNECTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))
        .expect("collector can be registered");
}
