use std::sync::Arc;
use std::time::Duration;

use backend_hub::live::apply_connection_updates;
use backend_hub::BackendHandle;
use backend_hub::BackoffPolicy;
use backend_hub::ConnectionConfig;
use backend_hub::CoordinationConfig;
use backend_hub::TaggedRegistry;
use backend_hub::WatchPathConfig;
use backend_hub::WatchState;
use backend_hub::WatchSupervisor;
use tokio_util::sync::CancellationToken;

use crate::common::wait_until_armed;
use crate::common::MemoryConnector;
use crate::common::MemoryCoordination;

const CONFIG_PATH: &str = "/ccs/config";
const STATUS_PATH: &str = "/ccs/status";

fn coordination_config() -> CoordinationConfig {
    CoordinationConfig {
        hosts: vec!["127.0.0.1:2181".to_string()],
        watches: vec![WatchPathConfig::propagating(CONFIG_PATH), WatchPathConfig::new(STATUS_PATH)],
        rearm: BackoffPolicy {
            base_delay_ms: 1,
            max_delay_ms: 10,
            ..BackoffPolicy::default()
        },
        ..CoordinationConfig::default()
    }
}

fn records(configs: &[ConnectionConfig]) -> Vec<u8> {
    serde_json::to_vec(configs).unwrap()
}

async fn wait_for_address(
    registry: &TaggedRegistry<MemoryConnector>,
    tag: &str,
    address: &str,
) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(handle) = registry.resolve(tag) {
                if handle.config().address == address {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{tag} never resolved to {address}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watched_config_changes_reach_the_registry() {
    let coordination = Arc::new(MemoryCoordination::default());
    let registry = Arc::new(TaggedRegistry::new(MemoryConnector));
    let config = coordination_config();
    config.validate().unwrap();

    let (supervisor, receiver) = WatchSupervisor::new(coordination.clone(), config);
    supervisor.watch_all().await.unwrap();

    let token = CancellationToken::new();
    let live = tokio::spawn({
        let registry = registry.clone();
        let token = token.clone();
        async move { apply_connection_updates(&*registry, receiver, token).await }
    });

    coordination.write(
        CONFIG_PATH,
        records(&[
            ConnectionConfig::new("chat", "mongodb://db1:27017"),
            ConnectionConfig::new("cache", "redis://r1:6379"),
        ]),
    );
    wait_for_address(&registry, "chat", "mongodb://db1:27017").await;
    wait_for_address(&registry, "cache", "redis://r1:6379").await;

    // a status change is observed but never applied
    coordination.write(STATUS_PATH, "degraded");

    wait_until_armed(&coordination, CONFIG_PATH).await;
    let old_chat = registry.resolve("chat").unwrap();
    coordination.write(
        CONFIG_PATH,
        records(&[ConnectionConfig::new("chat", "mongodb://db2:27017")]),
    );
    wait_for_address(&registry, "chat", "mongodb://db2:27017").await;

    assert!(old_chat.is_closed());
    assert_eq!(registry.resolve("cache").unwrap().config().address, "redis://r1:6379");
    assert_eq!(registry.tags(), vec!["cache".to_string(), "chat".to_string()]);
    assert_eq!(supervisor.fetch(STATUS_PATH).await.unwrap(), "degraded");

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(CONFIG_PATH), Some(WatchState::Idle));

    token.cancel();
    let applied = live.await.unwrap();
    assert_eq!(applied, 2);

    registry.close_all().await.unwrap();
    assert!(registry.resolve("chat").err().unwrap().is_not_found());
}
