//! Tag-addressed backend connections
//!
//! - [`Connector`] - fixed-client factory: one config in, one live handle out
//! - [`BackendHandle`] - the minimal contract every live connection honours
//! - [`TaggedRegistry`] - tag -> handle mapping with add / resolve / teardown
//! - [`BackendRegistry`] - the capability callers of a backend family see
//!
//! Each backend family (document store, cache) plugs in its own connector and
//! handle; the registry never looks past [`BackendHandle`].
//!
//! ```ignore
//! let registry = RedisRegistry::new(RedisConnector);
//! registry.add(ConnectionConfig::new("cache", "redis://127.0.0.1:6379")).await?;
//!
//! let cache = registry.resolve("cache")?;
//! cache.set("user:1001", "Alice", None).await?;
//! ```

mod registry;
pub use registry::*;

#[cfg(feature = "mongo")]
mod mongo;
#[cfg(feature = "mongo")]
pub use mongo::*;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::*;


use std::sync::Arc;

use async_trait::async_trait;

use crate::ConnectionConfig;
use crate::Result;

/// A live connection to one backend instance.
///
/// Implementations are internally thread-safe; the registry shares one
/// handle between concurrent callers without extra locking.
#[async_trait]
pub trait BackendHandle: Send + Sync + 'static {
    /// The record this handle was built from
    fn config(&self) -> &ConnectionConfig;

    fn is_closed(&self) -> bool;

    /// Releases the underlying connection. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Fixed-client factory for one backend family.
///
/// `build` opens exactly one connection scoped to the config's address and
/// sub-resource. It must not touch any registry state, so a failed build
/// leaves every registry unchanged.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: BackendHandle;

    async fn build(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Self::Handle>;
}

/// What callers of one backend family depend on: resolve a tag, tear down.
#[async_trait]
pub trait BackendRegistry: Send + Sync {
    type Handle: BackendHandle;

    fn resolve(
        &self,
        tag: &str,
    ) -> Result<Arc<Self::Handle>>;

    async fn close(&self) -> Result<()>;
}
