//! Watch-driven configuration propagation
//!
//! A coordination service (e.g. ZooKeeper) is observed through the narrow
//! [`CoordinationClient`] capability. Every watched path gets its own
//! [`WatchSubscription`] task; paths registered with `propagate = true` push
//! the changed bytes onto the [`propagation_channel`], all others are logged
//! only.
//!
//! ```text
//! ┌──────────────────┐  watch_path()   ┌──────────────────┐
//! │ Coordination     │ ──────────────▶ │ WatchSubscription│  one task per path
//! │ service session  │  events stream  │  Idle/Armed/...  │
//! └──────────────────┘                 └────────┬─────────┘
//!                                               │ propagate = true
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │ propagation chan │  bounded, FIFO
//!                                      └────────┬─────────┘
//!                                               ▼
//!                                         live consumer
//! ```
//!
//! Every task observes one `CancellationToken`; [`WatchSupervisor::shutdown`]
//! cancels it, unblocking any pending channel send, then closes the session.

mod channel;
mod supervisor;
mod watch;
pub use channel::*;
pub use supervisor::*;
pub use watch::*;

#[cfg(feature = "zookeeper")]
mod zookeeper;
#[cfg(feature = "zookeeper")]
pub use self::zookeeper::*;


use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Events of one path watch. The stream ends once the watch is consumed.
pub type WatchStream = BoxStream<'static, Result<CoordinationEvent>>;

/// Session state transitions of a coordination session
pub type SessionStream = BoxStream<'static, SessionEvent>;

/// What a path watch reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// Bytes read while registering the watch. Only a change against the
    /// bytes already seen by the subscription is delivered.
    Registered(Bytes),
    /// Node data changed; carries the bytes read after the change
    DataChanged(Bytes),
    /// Node was deleted
    NodeDeleted,
    /// Session-level transition delivered through the path watch
    Session(SessionEvent),
    /// Any other event kind (child changes, creations, ...)
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    ConnectedReadOnly,
    Disconnected,
    Expired,
    AuthFailed,
    Closed,
    Other(String),
}

impl SessionEvent {
    /// No further transitions follow a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Expired | SessionEvent::Closed | SessionEvent::AuthFailed)
    }
}

/// Capability of an established coordination session
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Reads the current bytes of `path`
    async fn get(
        &self,
        path: &str,
    ) -> Result<Bytes>;

    /// Registers a watch on `path`. The stream may start with
    /// `CoordinationEvent::Registered` carrying the data read at registration.
    ///
    /// # Errors
    /// `WatchError::Arm` if the service rejects the registration.
    async fn watch_path(
        &self,
        path: &str,
    ) -> Result<WatchStream>;

    /// Session state transitions, for logging
    fn session_events(&self) -> SessionStream;

    /// Closes the session; outstanding watches end
    async fn close(&self) -> Result<()>;
}

/// Opens coordination sessions
#[async_trait]
pub trait CoordinationConnector: Send + Sync {
    type Client: CoordinationClient;

    /// # Errors
    /// `WatchError::Session` if no session can be established within `timeout`.
    async fn connect(
        &self,
        hosts: &[String],
        timeout: Duration,
    ) -> Result<Self::Client>;
}
