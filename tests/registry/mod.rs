use std::sync::Arc;

use backend_hub::BackendHandle;
use backend_hub::BackendRegistry;
use backend_hub::ConnectionConfig;
use backend_hub::Settings;
use backend_hub::TaggedRegistry;

use crate::common::MemoryConnector;

/// Callers depend on the capability only; the registry is swapped in behind it
async fn address_of<R: BackendRegistry>(
    registry: &R,
    tag: &str,
) -> backend_hub::Result<String> {
    let handle = registry.resolve(tag)?;
    Ok(handle.config().address.clone())
}

#[tokio::test]
async fn test_settings_connections_are_routable_by_tag() {
    let mut settings = Settings::default();
    settings.redis = vec![
        ConnectionConfig::new("cache", "redis://r1:6379"),
        ConnectionConfig::new("session", "redis://r2:6379"),
    ];
    let settings = settings.validate().unwrap();

    let registry = Arc::new(TaggedRegistry::new(MemoryConnector));
    registry.add_all(settings.redis.clone()).await.unwrap();

    assert_eq!(address_of(&*registry, "cache").await.unwrap(), "redis://r1:6379");
    assert_eq!(address_of(&*registry, "session").await.unwrap(), "redis://r2:6379");
    assert!(address_of(&*registry, "missing").await.unwrap_err().is_not_found());

    BackendRegistry::close(&*registry).await.unwrap();
    assert!(registry.is_empty());
}
