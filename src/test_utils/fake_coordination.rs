use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::CoordinationClient;
use crate::CoordinationConnector;
use crate::CoordinationEvent;
use crate::Result;
use crate::SessionEvent;
use crate::SessionStream;
use crate::WatchError;
use crate::WatchStream;

type EventSender = mpsc::UnboundedSender<Result<CoordinationEvent>>;

/// In-memory coordination session.
///
/// Every `watch_path` call opens a fresh event stream for that path; tests
/// push events with [`emit`](Self::emit) and consume the watch with
/// [`consume`](Self::consume).
#[derive(Default)]
pub struct FakeCoordination {
    data: Mutex<HashMap<String, Bytes>>,
    watches: Mutex<HashMap<String, EventSender>>,
    arms: Mutex<HashMap<String, usize>>,
    rejected: Mutex<HashSet<String>>,
    session: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    session_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    closed: AtomicBool,
    arm_delay: Option<Duration>,
}

impl FakeCoordination {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Mutex::new(Some(rx)),
            session_tx: Mutex::new(Some(tx)),
            ..Self::default()
        }
    }

    /// Every `watch_path` call waits `delay` before registering
    pub fn with_arm_delay(delay: Duration) -> Self {
        Self {
            arm_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn set_data(
        &self,
        path: &str,
        data: impl Into<Bytes>,
    ) {
        self.data.lock().insert(path.to_string(), data.into());
    }

    /// Makes every future arm on `path` fail
    pub fn reject(
        &self,
        path: &str,
    ) {
        self.rejected.lock().insert(path.to_string());
    }

    /// Pushes `event` on the current watch of `path`. False if nothing is armed.
    pub fn emit(
        &self,
        path: &str,
        event: Result<CoordinationEvent>,
    ) -> bool {
        match self.watches.lock().get(path) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Ends the current watch stream of `path`, as a one-shot watch does
    /// after firing
    pub fn consume(
        &self,
        path: &str,
    ) {
        self.watches.lock().remove(path);
    }

    pub fn emit_session(
        &self,
        event: SessionEvent,
    ) {
        if let Some(tx) = self.session_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn arms(
        &self,
        path: &str,
    ) -> usize {
        self.arms.lock().get(path).copied().unwrap_or(0)
    }

    pub fn is_armed(
        &self,
        path: &str,
    ) -> bool {
        self.watches.lock().contains_key(path)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Polls until `path` has been armed `count` times
    pub async fn wait_for_arms(
        &self,
        path: &str,
        count: usize,
    ) {
        for _ in 0..200 {
            if self.arms(path) >= count && self.is_armed(path) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{path} was not armed {count} times");
    }
}

#[async_trait]
impl CoordinationClient for FakeCoordination {
    async fn get(
        &self,
        path: &str,
    ) -> Result<Bytes> {
        self.data.lock().get(path).cloned().ok_or_else(|| {
            WatchError::Fetch {
                path: path.to_string(),
                source: "no node".into(),
            }
            .into()
        })
    }

    async fn watch_path(
        &self,
        path: &str,
    ) -> Result<WatchStream> {
        if let Some(delay) = self.arm_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(WatchError::Cancelled.into());
        }
        if self.rejected.lock().contains(path) {
            return Err(WatchError::Arm {
                path: path.to_string(),
                source: "no node".into(),
            }
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.lock().insert(path.to_string(), tx);
        *self.arms.lock().entry(path.to_string()).or_default() += 1;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn session_events(&self) -> SessionStream {
        match self.session.lock().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.watches.lock().clear();
        self.session_tx.lock().take();
        Ok(())
    }
}

/// Hands out [`FakeCoordination`] sessions, or refuses to when `unreachable`
#[derive(Default)]
pub struct FakeCoordinationConnector {
    pub unreachable: bool,
}

#[async_trait]
impl CoordinationConnector for FakeCoordinationConnector {
    type Client = FakeCoordination;

    async fn connect(
        &self,
        hosts: &[String],
        _timeout: Duration,
    ) -> Result<FakeCoordination> {
        if self.unreachable {
            return Err(WatchError::Session {
                hosts: hosts.to_vec(),
                source: "connection refused".into(),
            }
            .into());
        }
        Ok(FakeCoordination::new())
    }
}
