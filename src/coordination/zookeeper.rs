//! ZooKeeper session on top of `zookeeper-client`
//!
//! Watches are ZooKeeper one-shot data watches: every stream returned by
//! `watch_path` yields the data read while registering, then the single
//! fired event, and then ends. Continuous observation relies on the
//! subscription's explicit re-arm.

use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use tracing::debug;
use zookeeper_client as zk;

use super::CoordinationClient;
use super::CoordinationConnector;
use super::CoordinationEvent;
use super::SessionEvent;
use super::SessionStream;
use super::WatchStream;
use crate::Result;
use crate::WatchError;

#[derive(Debug, Default, Clone, Copy)]
pub struct ZkConnector;

#[async_trait]
impl CoordinationConnector for ZkConnector {
    type Client = ZkClient;

    async fn connect(
        &self,
        hosts: &[String],
        timeout: Duration,
    ) -> Result<ZkClient> {
        let cluster = hosts.join(",");
        let session_error = |source: Box<dyn std::error::Error + Send + Sync>| WatchError::Session {
            hosts: hosts.to_vec(),
            source,
        };

        let mut connector = zk::Client::connector();
        let connecting = connector.session_timeout(timeout).connect(&cluster);
        let client = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|e| session_error(Box::new(e)))?
            .map_err(|e| session_error(Box::new(e)))?;

        debug!(cluster = %cluster, "zookeeper session connected");
        Ok(ZkClient {
            client: ArcSwapOption::from_pointee(client),
        })
    }
}

/// One ZooKeeper session. `close` drops the session; later calls fail with
/// `WatchError::Cancelled`.
pub struct ZkClient {
    client: ArcSwapOption<zk::Client>,
}

impl ZkClient {
    fn session(&self) -> Result<zk::Client> {
        self.client
            .load_full()
            .map(|client| (*client).clone())
            .ok_or_else(|| WatchError::Cancelled.into())
    }
}

#[async_trait]
impl CoordinationClient for ZkClient {
    async fn get(
        &self,
        path: &str,
    ) -> Result<Bytes> {
        let (data, _) = self.session()?.get_data(path).await.map_err(|e| WatchError::Fetch {
            path: path.to_string(),
            source: Box::new(e),
        })?;
        Ok(Bytes::from(data))
    }

    async fn watch_path(
        &self,
        path: &str,
    ) -> Result<WatchStream> {
        let client = self.session()?;
        let (registered, _, watcher) = client.get_and_watch_data(path).await.map_err(|e| WatchError::Arm {
            path: path.to_string(),
            source: Box::new(e),
        })?;

        let path = path.to_string();
        let fired = stream::once(async move {
            let event = watcher.changed().await;
            match event.event_type {
                zk::EventType::NodeDataChanged => {
                    let (data, _) = client.get_data(&path).await.map_err(|e| WatchError::Fetch {
                        path: path.clone(),
                        source: Box::new(e),
                    })?;
                    Ok(CoordinationEvent::DataChanged(Bytes::from(data)))
                }
                zk::EventType::NodeDeleted => Ok(CoordinationEvent::NodeDeleted),
                zk::EventType::Session => Ok(CoordinationEvent::Session(session_event(event.session_state))),
                other => Ok(CoordinationEvent::Other(format!("{other:?}"))),
            }
        });
        let registered = stream::once(async move { Ok(CoordinationEvent::Registered(Bytes::from(registered))) });
        Ok(registered.chain(fired).boxed())
    }

    fn session_events(&self) -> SessionStream {
        let Ok(client) = self.session() else {
            return stream::empty().boxed();
        };
        stream::unfold(Some(client.state_watcher()), |watcher| async move {
            let mut watcher = watcher?;
            let event = session_event(watcher.changed().await);
            let next = if event.is_terminal() { None } else { Some(watcher) };
            Some((event, next))
        })
        .boxed()
    }

    async fn close(&self) -> Result<()> {
        if self.client.swap(None).is_some() {
            debug!("zookeeper session released");
        }
        Ok(())
    }
}

fn session_event(state: zk::SessionState) -> SessionEvent {
    match state {
        zk::SessionState::SyncConnected => SessionEvent::Connected,
        zk::SessionState::ConnectedReadOnly => SessionEvent::ConnectedReadOnly,
        zk::SessionState::Disconnected => SessionEvent::Disconnected,
        zk::SessionState::Expired => SessionEvent::Expired,
        zk::SessionState::AuthFailed => SessionEvent::AuthFailed,
        zk::SessionState::Closed => SessionEvent::Closed,
        #[allow(unreachable_patterns)]
        other => SessionEvent::Other(format!("{other:?}")),
    }
}
