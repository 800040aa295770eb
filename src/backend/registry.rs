use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BackendHandle;
use super::BackendRegistry;
use super::Connector;
use crate::ConnectionConfig;
use crate::Error;
use crate::Result;
use crate::RoutingError;

/// Maps tags to live handles of one backend family.
///
/// The map is the only shared mutable state: inserts, lookups and teardown
/// each take the lock for a single map operation, and never across a network
/// call, so `resolve` never observes a half-built entry.
///
/// Handles are handed out as `Arc`s for the duration of one call. Callers
/// re-resolve per call instead of caching a handle, since `add` may replace
/// and close it at any time.
pub struct TaggedRegistry<C: Connector> {
    connector: C,
    handles: RwLock<HashMap<String, Arc<C::Handle>>>,
}

impl<C: Connector> TaggedRegistry<C> {
    /// Creates an empty registry that builds handles with `connector`
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Builds a handle for `config` and registers it under `config.tag`.
    ///
    /// On failure the registry is left unchanged. When the tag is already
    /// registered the previous handle is replaced and closed; a failure to
    /// close it is logged, the new handle stays registered.
    pub async fn add(
        &self,
        config: ConnectionConfig,
    ) -> Result<()> {
        config.validate()?;

        let handle = self.connector.build(&config).await.map_err(|e| {
            error!(tag = %config.tag, address = %config.address, "build handle failed: {}", e);
            e
        })?;

        let previous = self.handles.write().insert(config.tag.clone(), Arc::new(handle));

        match previous {
            Some(old) => {
                info!(tag = %config.tag, address = %config.address, "handle replaced");
                if let Err(e) = old.close().await {
                    warn!(tag = %config.tag, "closing replaced handle failed: {}", e);
                }
            }
            None => {
                info!(tag = %config.tag, address = %config.address, "handle registered");
            }
        }
        Ok(())
    }

    /// Adds every config in order.
    ///
    /// The first failure aborts the rest of the batch and is returned.
    /// Configs added before the failure stay registered.
    pub async fn add_all<I>(
        &self,
        configs: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = ConnectionConfig>,
    {
        let mut applied = 0usize;
        for config in configs {
            let tag = config.tag.clone();
            if let Err(e) = self.add(config).await {
                warn!(tag = %tag, applied, "batch add aborted");
                return Err(e);
            }
            applied += 1;
        }
        debug!(applied, "batch add completed");
        Ok(())
    }

    /// Returns the handle registered under `tag`
    ///
    /// # Errors
    /// - `RoutingError::NotFound` if the tag was never added (or was torn down)
    /// - `RoutingError::HandleClosed` if the handle has been closed underneath
    pub fn resolve(
        &self,
        tag: &str,
    ) -> Result<Arc<C::Handle>> {
        let handle = self
            .handles
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| RoutingError::NotFound { tag: tag.to_string() })?;

        if handle.is_closed() {
            return Err(RoutingError::HandleClosed { tag: tag.to_string() }.into());
        }
        Ok(handle)
    }

    /// Unregisters and closes the handle under `tag`
    pub async fn remove(
        &self,
        tag: &str,
    ) -> Result<()> {
        let handle = self
            .handles
            .write()
            .remove(tag)
            .ok_or_else(|| RoutingError::NotFound { tag: tag.to_string() })?;

        info!(tag, "handle removed");
        handle.close().await
    }

    /// Closes every registered handle and empties the registry.
    ///
    /// Keeps going past failures; every failed tag is reported in one
    /// `Error::CloseAll`. Afterwards no previously registered tag resolves.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<C::Handle>)> = std::mem::take(&mut *self.handles.write()).into_iter().collect();

        let mut failures = Vec::new();
        for (tag, handle) in drained {
            match handle.close().await {
                Ok(()) => debug!(tag = %tag, "handle closed"),
                Err(e) => {
                    error!(tag = %tag, "close handle failed: {}", e);
                    failures.push((tag, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseAll(failures))
        }
    }

    pub fn contains(
        &self,
        tag: &str,
    ) -> bool {
        self.handles.read().contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handles.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

#[async_trait]
impl<C: Connector> BackendRegistry for TaggedRegistry<C> {
    type Handle = C::Handle;

    fn resolve(
        &self,
        tag: &str,
    ) -> Result<Arc<Self::Handle>> {
        TaggedRegistry::resolve(self, tag)
    }

    async fn close(&self) -> Result<()> {
        self.close_all().await
    }
}
