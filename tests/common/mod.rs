//! In-memory backends shared by the integration tests

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use async_trait::async_trait;
use backend_hub::BackendHandle;
use backend_hub::ConnectionConfig;
use backend_hub::Connector;
use backend_hub::CoordinationClient;
use backend_hub::CoordinationEvent;
use backend_hub::Result;
use backend_hub::SessionStream;
use backend_hub::WatchError;
use backend_hub::WatchStream;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Handle that records the record it was built from
pub struct MemoryHandle {
    config: ConnectionConfig,
    closed: AtomicBool,
}

#[async_trait]
impl BackendHandle for MemoryHandle {
    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConnector;

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryHandle;

    async fn build(
        &self,
        config: &ConnectionConfig,
    ) -> Result<MemoryHandle> {
        Ok(MemoryHandle {
            config: config.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Coordination session whose watched nodes are written by the test
#[derive(Default)]
pub struct MemoryCoordination {
    nodes: Mutex<HashMap<String, Bytes>>,
    watches: Mutex<HashMap<String, mpsc::UnboundedSender<Result<CoordinationEvent>>>>,
}

impl MemoryCoordination {
    /// Stores `data` under `path` and fires the one-shot watch on it
    pub fn write(
        &self,
        path: &str,
        data: impl Into<Bytes>,
    ) {
        let data = data.into();
        self.nodes.lock().unwrap().insert(path.to_string(), data.clone());
        if let Some(watch) = self.watches.lock().unwrap().remove(path) {
            let _ = watch.send(Ok(CoordinationEvent::DataChanged(data)));
        }
    }

    pub fn is_armed(
        &self,
        path: &str,
    ) -> bool {
        self.watches.lock().unwrap().contains_key(path)
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn get(
        &self,
        path: &str,
    ) -> Result<Bytes> {
        self.nodes.lock().unwrap().get(path).cloned().ok_or_else(|| {
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
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches.lock().unwrap().insert(path.to_string(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn session_events(&self) -> SessionStream {
        stream::pending().boxed()
    }

    async fn close(&self) -> Result<()> {
        self.watches.lock().unwrap().clear();
        Ok(())
    }
}

pub async fn wait_until_armed(
    coordination: &MemoryCoordination,
    path: &str,
) {
    for _ in 0..200 {
        if coordination.is_armed(path) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("{path} was never armed");
}
