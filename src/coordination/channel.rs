use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::Result;
use crate::WatchError;

/// Changed bytes of one watched path. The bytes are opaque here; decoding
/// is up to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    pub path: String,
    pub data: Bytes,
}

impl ConfigPayload {
    pub fn new(
        path: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Creates the bounded propagation channel.
///
/// Payloads are queued FIFO and never coalesced. A send on a full channel
/// waits up to `send_timeout` (forever when `None`) before failing.
///
/// # Panics
/// Panics if `capacity` is 0.
pub fn propagation_channel(
    capacity: usize,
    send_timeout: Option<Duration>,
) -> (PropagationSender, PropagationReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (PropagationSender { tx, send_timeout }, PropagationReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct PropagationSender {
    tx: mpsc::Sender<ConfigPayload>,
    send_timeout: Option<Duration>,
}

impl PropagationSender {
    /// Queues `payload`, waiting while the channel is full
    ///
    /// # Errors
    /// - `WatchError::ChannelTimeout` if the channel stayed full for the send timeout
    /// - `WatchError::ChannelClosed` if the receiver is gone
    pub async fn send(
        &self,
        payload: ConfigPayload,
    ) -> Result<()> {
        match self.send_timeout {
            Some(timeout) => self.tx.send_timeout(payload, timeout).await.map_err(|e| match e {
                SendTimeoutError::Timeout(p) => WatchError::ChannelTimeout { path: p.path, timeout },
                SendTimeoutError::Closed(p) => WatchError::ChannelClosed { path: p.path },
            })?,
            None => self
                .tx
                .send(payload)
                .await
                .map_err(|e| WatchError::ChannelClosed { path: e.0.path })?,
        }
        Ok(())
    }

    /// Free slots left
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct PropagationReceiver {
    rx: mpsc::Receiver<ConfigPayload>,
}

impl PropagationReceiver {
    /// Waits for the next payload; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ConfigPayload> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConfigPayload> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<ConfigPayload> {
        ReceiverStream::new(self.rx)
    }

    /// Turns the receiver into one that several consumers can drain; each
    /// payload goes to exactly one of them.
    pub fn shared(self) -> SharedPropagationReceiver {
        SharedPropagationReceiver {
            rx: Arc::new(Mutex::new(self.rx)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedPropagationReceiver {
    rx: Arc<Mutex<mpsc::Receiver<ConfigPayload>>>,
}

impl SharedPropagationReceiver {
    pub async fn recv(&self) -> Option<ConfigPayload> {
        self.rx.lock().await.recv().await
    }
}
