use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::BackendError;
use crate::BackendHandle;
use crate::ConnectionConfig;
use crate::Connector;
use crate::Result;

/// Observable side of a [`FakeHandle`]; survives the handle being dropped by
/// the registry.
#[derive(Debug, Default)]
pub struct FakeHandleProbe {
    pub close_calls: AtomicUsize,
    pub closed: AtomicBool,
    pub fail_close: bool,
}

impl FakeHandleProbe {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    config: ConnectionConfig,
    probe: Arc<FakeHandleProbe>,
}

impl FakeHandle {
    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn probe(&self) -> &Arc<FakeHandleProbe> {
        &self.probe
    }
}

#[async_trait]
impl BackendHandle for FakeHandle {
    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.probe.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.closed.store(true, Ordering::SeqCst);
        if self.probe.fail_close {
            return Err(BackendError::close(&self.config.tag, "socket already reset").into());
        }
        Ok(())
    }
}

/// In-memory connector. Builds against addresses in `unreachable` fail;
/// handles built for addresses in `unclosable` fail to close.
#[derive(Default)]
pub struct FakeConnector {
    unreachable: Mutex<HashSet<String>>,
    unclosable: Mutex<HashSet<String>>,
    build_delay: Option<Duration>,
    builds: AtomicUsize,
    built: Mutex<Vec<(String, Arc<FakeHandleProbe>)>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build_delay(delay: Duration) -> Self {
        Self {
            build_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn unreachable(
        self,
        address: &str,
    ) -> Self {
        self.unreachable.lock().insert(address.to_string());
        self
    }

    pub fn unclosable(
        self,
        address: &str,
    ) -> Self {
        self.unclosable.lock().insert(address.to_string());
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Probes of every handle built for `tag`, oldest first
    pub fn probes(
        &self,
        tag: &str,
    ) -> Vec<Arc<FakeHandleProbe>> {
        self.built
            .lock()
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, probe)| probe.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Handle = FakeHandle;

    async fn build(
        &self,
        config: &ConnectionConfig,
    ) -> Result<FakeHandle> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().contains(&config.address) {
            return Err(BackendError::connect(&config.tag, &config.address, "connection refused").into());
        }

        let probe = Arc::new(FakeHandleProbe {
            fail_close: self.unclosable.lock().contains(&config.address),
            ..FakeHandleProbe::default()
        });
        self.built.lock().push((config.tag.clone(), probe.clone()));
        Ok(FakeHandle {
            config: config.clone(),
            probe,
        })
    }
}
