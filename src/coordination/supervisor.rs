use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::DashSet;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::propagation_channel;
use super::CoordinationClient;
use super::CoordinationConnector;
use super::PropagationReceiver;
use super::PropagationSender;
use super::WatchState;
use super::WatchSubscription;
use crate::async_task::spawn_task;
use crate::CoordinationConfig;
use crate::Error;
use crate::Result;
use crate::WatchError;
use crate::WatchPathConfig;

/// Owns one coordination session and every watch task running on it.
///
/// # Lifecycle
/// 1. [`connect`](Self::connect) / [`new`](Self::new) - session + propagation channel
/// 2. [`watch_all`](Self::watch_all) - arm configured paths, spawn their tasks
/// 3. [`shutdown`](Self::shutdown) - cancel tasks, wait for them, close the session
pub struct WatchSupervisor<C: CoordinationClient> {
    client: Arc<C>,
    config: CoordinationConfig,
    sender: PropagationSender,
    shutdown: CancellationToken,
    states: DashMap<String, watch::Receiver<WatchState>>,
    /// Paths with a `watch` call in flight
    arming: DashSet<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: CoordinationClient> WatchSupervisor<C> {
    /// Opens a session on `config.hosts`.
    ///
    /// # Errors
    /// The session failure of the connector, unchanged.
    pub async fn connect<K>(
        connector: &K,
        config: CoordinationConfig,
    ) -> Result<(Self, PropagationReceiver)>
    where
        K: CoordinationConnector<Client = C>,
    {
        let client = connector
            .connect(&config.hosts, config.session_timeout())
            .await
            .map_err(|e| {
                error!(hosts = ?config.hosts, "coordination connect failed: {}", e);
                e
            })?;
        info!(hosts = ?config.hosts, "coordination session established");
        Ok(Self::new(Arc::new(client), config))
    }

    /// Wraps an established session
    pub fn new(
        client: Arc<C>,
        config: CoordinationConfig,
    ) -> (Self, PropagationReceiver) {
        let (sender, receiver) = propagation_channel(config.channel_capacity.max(1), config.send_timeout());
        let supervisor = Self {
            client,
            config,
            sender,
            shutdown: CancellationToken::new(),
            states: DashMap::new(),
            arming: DashSet::new(),
            tasks: Mutex::new(Vec::new()),
        };
        (supervisor, receiver)
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Arms every configured path and starts the session-event logger.
    ///
    /// Stops at the first path that cannot be armed and returns its error;
    /// paths armed before it keep running.
    pub async fn watch_all(&self) -> Result<()> {
        for registration in self.config.watches.clone() {
            self.watch(registration).await?;
        }

        let mut events = self.client.session_events();
        let token = self.shutdown.clone();
        let handle = spawn_task("coordination-session-events", move || async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.next() => match event {
                        Some(event) => {
                            info!(?event, "coordination session transition");
                            if event.is_terminal() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            Ok(())
        });
        self.tasks.lock().push(handle);
        Ok(())
    }

    /// Arms one path and spawns its task
    ///
    /// # Errors
    /// - `WatchError::Cancelled` after shutdown
    /// - `Error::InvalidConfig` if the path already has a live subscription
    ///   or another call is arming it
    /// - the arm failure of the coordination client
    pub async fn watch(
        &self,
        registration: WatchPathConfig,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(WatchError::Cancelled.into());
        }
        let Some(_reservation) = ArmingReservation::take(&self.arming, &registration.path) else {
            return Err(Error::InvalidConfig(format!(
                "path {} is already being armed",
                registration.path
            )));
        };
        if self.state(&registration.path).is_some_and(|s| s != WatchState::Idle) {
            return Err(Error::InvalidConfig(format!(
                "path {} is already watched",
                registration.path
            )));
        }

        let path = registration.path.clone();
        let subscription = WatchSubscription::new(
            self.client.clone(),
            registration,
            self.sender.clone(),
            self.config.rearm,
        );
        let state = subscription.state_receiver();

        let handle = subscription.spawn(self.shutdown.child_token()).await?;
        self.states.insert(path, state);
        self.tasks.lock().push(handle);
        Ok(())
    }

    /// Current bytes of `path`
    pub async fn fetch(
        &self,
        path: &str,
    ) -> Result<Bytes> {
        self.client.get(path).await
    }

    /// State of the subscription on `path`, `None` if it was never armed
    pub fn state(
        &self,
        path: &str,
    ) -> Option<WatchState> {
        self.states.get(path).map(|state| *state.borrow())
    }

    /// Paths armed through this supervisor, sorted
    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.states.iter().map(|entry| entry.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every task, waits for them to stop, then closes the session.
    ///
    /// Pending channel sends are abandoned, not awaited.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        debug!(tasks = handles.len(), "waiting for watch tasks to stop");
        for handle in handles {
            if let Err(e) = handle.await {
                error!("watch task failed: {:?}", e);
            }
        }

        self.client.close().await?;
        info!("coordination session closed");
        Ok(())
    }
}

/// Holds a path in the arming set until dropped
struct ArmingReservation<'a> {
    arming: &'a DashSet<String>,
    path: String,
}

impl<'a> ArmingReservation<'a> {
    fn take(
        arming: &'a DashSet<String>,
        path: &str,
    ) -> Option<Self> {
        arming.insert(path.to_string()).then(|| Self {
            arming,
            path: path.to_string(),
        })
    }
}

impl Drop for ArmingReservation<'_> {
    fn drop(&mut self) {
        self.arming.remove(&self.path);
    }
}
