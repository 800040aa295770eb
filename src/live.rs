//! Applies connection records pushed over the propagation channel
//!
//! A payload is a JSON list of [`ConnectionConfig`](crate::ConnectionConfig)
//! records. Each accepted payload is added to the registry as one batch.

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::validate_connections;
use crate::ConfigPayload;
use crate::ConnectionConfig;
use crate::Connector;
use crate::PropagationReceiver;
use crate::Result;
use crate::TaggedRegistry;

/// Drains `receiver` into `registry` until `shutdown` fires or every sender
/// is gone. Bad payloads are logged and skipped.
///
/// Returns the number of payloads applied in full.
pub async fn apply_connection_updates<C: Connector>(
    registry: &TaggedRegistry<C>,
    mut receiver: PropagationReceiver,
    shutdown: CancellationToken,
) -> usize {
    let mut applied = 0;
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("live config loop cancelled");
                break;
            }
            payload = receiver.recv() => match payload {
                Some(payload) => payload,
                None => {
                    debug!("propagation channel closed, live config loop stopped");
                    break;
                }
            },
        };

        match apply_payload(registry, &payload).await {
            Ok(count) => {
                applied += 1;
                info!(path = %payload.path, connections = count, "live config applied");
            }
            Err(e) => {
                error!(path = %payload.path, "live config rejected: {}", e);
            }
        }
    }
    applied
}

/// Decodes one payload and adds its records. Returns how many were added.
pub async fn apply_payload<C: Connector>(
    registry: &TaggedRegistry<C>,
    payload: &ConfigPayload,
) -> Result<usize> {
    let configs = ConnectionConfig::list_from_slice(&payload.data)?;
    validate_connections(&payload.path, &configs)?;
    let count = configs.len();
    registry.add_all(configs).await?;
    Ok(count)
}
