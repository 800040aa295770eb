//! Error hierarchy for the backend hub
//!
//! Errors are grouped by the layer that raises them so that callers can tell
//! "never configured" (routing) apart from "configured but broken"
//! (configuration / backend) and from background watch failures.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration source loading or deserialization failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configuration record failed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Tag lookup failures
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Connection establishment and operation failures of a backend
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Coordination session and watch failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// One or more handles failed to close during a full teardown
    #[error("Failed to close {} handle(s): [{}]", .0.len(), failed_tags(.0))]
    CloseAll(Vec<(String, Error)>),

    /// Live configuration payload could not be decoded
    #[error("Failed to decode config payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Task failed after max retries: {0}")]
    RetryTaskFailed(String),

    #[error("Task timed out after {0:?}")]
    RetryTimeout(Duration),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

fn failed_tags(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(tag, _)| tag.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// The tag was never registered (or has been torn down)
    #[error("No connection {tag} in registry")]
    NotFound { tag: String },

    /// The tag resolved to a handle that has already been closed
    #[error("Connection {tag} is closed")]
    HandleClosed { tag: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to connect {tag} at {address}: {source}")]
    Connect {
        tag: String,
        address: String,
        #[source]
        source: BoxError,
    },

    /// Driver failure during a pass-through operation
    #[error("Operation on {tag} failed: {source}")]
    Transport {
        tag: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to close {tag}: {source}")]
    Close {
        tag: String,
        #[source]
        source: BoxError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Coordination session could not be established
    #[error("Failed to open coordination session with {hosts:?}: {source}")]
    Session {
        hosts: Vec<String>,
        #[source]
        source: BoxError,
    },

    /// Watch registration on a path was rejected
    #[error("Failed to arm watch on {path}: {source}")]
    Arm {
        path: String,
        #[source]
        source: BoxError,
    },

    /// Reading the changed data of a path failed
    #[error("Failed to fetch data of {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Propagation channel full for {timeout:?}, payload of {path} dropped")]
    ChannelTimeout { path: String, timeout: Duration },

    #[error("Propagation channel closed, payload of {path} dropped")]
    ChannelClosed { path: String },

    #[error("Watch cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a routing miss for a tag that was never registered
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Routing(RoutingError::NotFound { .. }))
    }
}

impl BackendError {
    pub fn connect(
        tag: &str,
        address: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        BackendError::Connect {
            tag: tag.to_string(),
            address: address.to_string(),
            source: source.into(),
        }
    }

    pub fn transport(
        tag: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        BackendError::Transport {
            tag: tag.to_string(),
            source: source.into(),
        }
    }

    pub fn close(
        tag: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        BackendError::Close {
            tag: tag.to_string(),
            source: source.into(),
        }
    }
}
