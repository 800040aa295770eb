use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ConfigPayload;
use super::CoordinationClient;
use super::CoordinationEvent;
use super::PropagationSender;
use super::WatchStream;
use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::Result;
use crate::WatchPathConfig;

/// Lifecycle of one path subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not registered with the coordination service
    Idle,
    /// Registered, waiting for the next event
    Armed,
    /// Pushing a changed payload onto the propagation channel
    Delivering,
}

/// Subscription to one coordination path.
///
/// Data changes are pushed onto the propagation channel when the path is
/// registered with `propagate`, in the order the service raised them.
/// Deletions end the subscription; session transitions and unknown events are
/// logged only. A consumed watch is re-armed only when `rearm` is set.
///
/// Data read while arming is a baseline: the first registration never
/// delivers it, a re-registration delivers it only if it differs from the
/// last bytes seen, so changes made between two one-shot watches are kept.
pub struct WatchSubscription<C: CoordinationClient> {
    client: Arc<C>,
    registration: WatchPathConfig,
    sink: PropagationSender,
    rearm_policy: BackoffPolicy,
    state: watch::Sender<WatchState>,
    last_seen: Option<Bytes>,
}

impl<C: CoordinationClient> WatchSubscription<C> {
    pub fn new(
        client: Arc<C>,
        registration: WatchPathConfig,
        sink: PropagationSender,
        rearm_policy: BackoffPolicy,
    ) -> Self {
        let (state, _) = watch::channel(WatchState::Idle);
        Self {
            client,
            registration,
            sink,
            rearm_policy,
            state,
            last_seen: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.registration.path
    }

    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    /// Observes state changes after the subscription has moved into its task
    pub fn state_receiver(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// Registers the watch. Idle -> Armed.
    ///
    /// # Errors
    /// Propagates the registration failure; the state stays Idle.
    pub async fn arm(&self) -> Result<WatchStream> {
        let stream = self.client.watch_path(&self.registration.path).await.map_err(|e| {
            error!(path = %self.registration.path, "arm watch failed: {}", e);
            e
        })?;

        self.set_state(WatchState::Armed);
        info!(
            path = %self.registration.path,
            propagate = self.registration.propagate,
            "watch armed"
        );
        Ok(stream)
    }

    /// Arms the watch, then drives it on a background task until the
    /// subscription goes idle or `shutdown` fires.
    pub async fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let stream = self.arm().await?;
        Ok(tokio::spawn(self.run(stream, shutdown)))
    }

    /// Event loop of an armed subscription
    pub async fn run(
        mut self,
        mut stream: WatchStream,
        shutdown: CancellationToken,
    ) {
        let path = self.registration.path.clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(CoordinationEvent::DataChanged(data))) => {
                    self.last_seen = Some(data.clone());
                    self.deliver(data, &shutdown).await;
                }
                Some(Ok(CoordinationEvent::Registered(data))) => {
                    let missed = self.last_seen.as_ref().is_some_and(|seen| *seen != data);
                    self.last_seen = Some(data.clone());
                    if missed {
                        debug!(path = %path, "data changed while the watch was re-armed");
                        self.deliver(data, &shutdown).await;
                    }
                }
                Some(Ok(CoordinationEvent::NodeDeleted)) => {
                    warn!(path = %path, "watched node deleted, subscription is defunct");
                    self.set_state(WatchState::Idle);
                    return;
                }
                Some(Ok(CoordinationEvent::Session(event))) => {
                    info!(path = %path, ?event, "session event on watch");
                }
                Some(Ok(CoordinationEvent::Other(kind))) => {
                    debug!(path = %path, kind = %kind, "ignoring watch event");
                }
                Some(Err(e)) => {
                    warn!(path = %path, "fetching changed data failed, still waiting: {}", e);
                }
                None => {
                    self.set_state(WatchState::Idle);
                    if !self.registration.rearm {
                        info!(path = %path, "watch consumed, not re-armed");
                        return;
                    }
                    match self.rearm(&shutdown).await {
                        Some(next) => stream = next,
                        None => return,
                    }
                }
            }
        }

        self.set_state(WatchState::Idle);
        debug!(path = %path, "watch task stopped");
    }

    async fn deliver(
        &self,
        data: Bytes,
        shutdown: &CancellationToken,
    ) {
        let path = &self.registration.path;
        info!(path = %path, len = data.len(), "watched data changed");

        if !self.registration.propagate {
            return;
        }

        self.set_state(WatchState::Delivering);
        let payload = ConfigPayload {
            path: path.clone(),
            data,
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(path = %path, "shutdown while delivering, payload dropped");
            }
            result = self.sink.send(payload) => match result {
                Ok(()) => debug!(path = %path, "payload propagated"),
                Err(e) => error!(path = %path, "propagation failed: {}", e),
            },
        }
        self.set_state(WatchState::Armed);
    }

    /// Re-registers a consumed watch under the backoff policy.
    /// `None` when shutdown fires first or every attempt fails.
    async fn rearm(
        &self,
        shutdown: &CancellationToken,
    ) -> Option<WatchStream> {
        let path = self.registration.path.as_str();
        let client = &self.client;
        let attempt = move || client.watch_path(path);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = task_with_timeout_and_exponential_backoff(attempt, self.rearm_policy) => match result {
                Ok(stream) => {
                    self.set_state(WatchState::Armed);
                    debug!(path = %path, "watch re-armed");
                    Some(stream)
                }
                Err(e) => {
                    error!(path = %path, "re-arm watch failed, subscription is idle: {}", e);
                    None
                }
            },
        }
    }

    fn set_state(
        &self,
        state: WatchState,
    ) {
        self.state.send_replace(state);
    }
}
