use std::env;

use serial_test::serial;

use crate::config::Settings;

#[test]
fn test_defaults_load_without_files() {
    let settings = Settings::default();

    assert_eq!(settings.sync.change_buffer_size, 256);
    assert_eq!(settings.sync.resync_interval_secs, 0);
    assert!(settings.sync.service_label.is_empty());
    assert_eq!(settings.retry.watch.max_retries, 0);
    assert_eq!(settings.retry.resync.max_retries, 3);
}

#[test]
fn test_agent_prefix_from_service_label() {
    let mut settings = Settings::default();
    assert_eq!(settings.sync.agent_prefix(), "");

    settings.sync.service_label = "vpp1".to_string();
    assert_eq!(settings.sync.agent_prefix(), "/vnf-agent/vpp1/");
}

#[test]
#[serial]
fn test_env_overrides_defaults() {
    env::set_var("KVSYNC__SYNC__CHANGE_BUFFER_SIZE", "16");
    env::set_var("KVSYNC__SYNC__SERVICE_LABEL", "agent-a");

    let settings = Settings::load(None).expect("settings should load");

    assert_eq!(settings.sync.change_buffer_size, 16);
    assert_eq!(settings.sync.service_label, "agent-a");

    env::remove_var("KVSYNC__SYNC__CHANGE_BUFFER_SIZE");
    env::remove_var("KVSYNC__SYNC__SERVICE_LABEL");
}
