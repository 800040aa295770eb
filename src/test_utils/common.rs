use std::time::Duration;

use bytes::Bytes;

use crate::BackoffPolicy;
use crate::ConfigPayload;
use crate::ConnectionConfig;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Backoff without real waiting, for re-arm paths in tests
pub fn fast_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 200,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

pub fn connection(
    tag: &str,
    address: &str,
) -> ConnectionConfig {
    ConnectionConfig::new(tag, address).with_timeout(Duration::from_millis(200))
}

/// JSON payload carrying `configs`, as a live config path would
pub fn connections_payload(
    path: &str,
    configs: &[ConnectionConfig],
) -> ConfigPayload {
    let data = serde_json::to_vec(configs).unwrap();
    ConfigPayload::new(path, Bytes::from(data))
}
