use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Coordination session, watched paths and the propagation channel.
///
/// ```toml
/// [coordination]
/// hosts = ["127.0.0.1:2181"]
/// session_timeout_ms = 5000
/// channel_capacity = 1
/// send_timeout_ms = 5000
///
/// [[coordination.watches]]
/// path = "/ccs/config"
/// propagate = true
///
/// [[coordination.watches]]
/// path = "/ccs/status"
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CoordinationConfig {
    /// Coordination service ensemble, `host:port` each
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Session timeout, also used as the connect timeout (unit: milliseconds)
    ///
    /// **Default**: 5000
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Capacity of the propagation channel
    ///
    /// A watch task blocks once this many payloads are waiting for the
    /// consumer.
    ///
    /// **Default**: 1
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long a watch task waits on a full propagation channel before the
    /// payload is dropped (unit: milliseconds). `0` waits until shutdown.
    ///
    /// **Default**: 5000
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Paths to watch
    #[serde(default)]
    pub watches: Vec<WatchPathConfig>,

    /// Backoff applied when re-arming a consumed watch
    #[serde(default)]
    pub rearm: BackoffPolicy,
}

/// One watched path
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchPathConfig {
    /// Absolute node path
    pub path: String,

    /// Push changed bytes onto the propagation channel. Paths without this
    /// flag are watched and logged only.
    #[serde(default)]
    pub propagate: bool,

    /// Re-arm the watch after it fires. Without it the subscription goes
    /// idle after the first event.
    #[serde(default = "default_rearm")]
    pub rearm: bool,
}

impl WatchPathConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            propagate: false,
            rearm: default_rearm(),
        }
    }

    pub fn propagating(path: impl Into<String>) -> Self {
        Self {
            propagate: true,
            ..Self::new(path)
        }
    }

    pub fn once(mut self) -> Self {
        self.rearm = false;
        self
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            hosts: vec![],
            session_timeout_ms: default_session_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            watches: vec![],
            rearm: BackoffPolicy::default(),
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// `None` means a full channel is waited on until shutdown
    pub fn send_timeout(&self) -> Option<Duration> {
        match self.send_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Validates coordination settings
    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - watches are configured without hosts
    /// - a watch path is not absolute or is listed twice
    /// - channel capacity or session timeout is 0
    pub fn validate(&self) -> Result<()> {
        if !self.watches.is_empty() && self.hosts.is_empty() {
            return Err(Error::InvalidConfig(
                "coordination.hosts must not be empty when watches are configured".into(),
            ));
        }

        if self.session_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "coordination.session_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "coordination.channel_capacity must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for watch in &self.watches {
            if !watch.path.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "watch path {} must be absolute",
                    watch.path
                )));
            }
            if !seen.insert(watch.path.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "watch path {} is listed twice",
                    watch.path
                )));
            }
        }

        if !self.watches.is_empty() && !self.watches.iter().any(|w| w.propagate) {
            warn!("no watch path has propagate = true; changes will only be logged");
        }

        self.rearm.validate("coordination.rearm")
    }
}

fn default_session_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_rearm() -> bool {
    true
}
