//! Periodic server push over a saved broadcaster.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use tw_protocol::TransportKind;
use tw_server::ServerApi;

/// Push the server clock to every live WebSocket connection on an
/// interval, until `shutdown` flips.
pub fn spawn_time_push(
    api: Arc<ServerApi>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let broadcaster = api.broadcaster(TransportKind::Ws, "server.time");
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let body = serde_json::json!({
                        "now": chrono::Utc::now().to_rfc3339(),
                    });
                    for conn_id in api.connections().snapshot(TransportKind::Ws) {
                        if let Err(e) = broadcaster.send(&conn_id, &body) {
                            debug!(conn_id = %conn_id, error = %e, "time push skipped");
                        }
                    }
                }
            }
        }
    })
}
