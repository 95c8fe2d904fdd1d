//! Demo command handlers, registered on every transport.

use std::sync::Arc;

use tracing::info;
use tw_server::ServerApi;

/// Register the demo command set.
pub fn register_handlers(api: &Arc<ServerApi>) {
    api.register_all(
        "ping",
        |ctx, req: serde_json::Value, responder| async move {
            let message = req["message"].as_str().unwrap_or_default();
            info!(conn_id = %ctx.conn_id, transport = %ctx.transport, message, "ping");
            responder
                .send(&serde_json::json!({
                    "message": format!("Pong: {message}"),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }))
                .await?;
            Ok(())
        },
    );

    api.register_all(
        "echo",
        |_ctx, req: serde_json::Value, responder| async move {
            responder.send(&req).await?;
            Ok(())
        },
    );

    api.register_all(
        "whoami",
        |ctx, _req: serde_json::Value, responder| async move {
            responder
                .send(&serde_json::json!({
                    "conn_id": ctx.conn_id,
                    "transport": ctx.transport.as_str(),
                    "principal": ctx.principal.as_ref().map(|p| p.name.clone()),
                    "connected_at": ctx.connected_at.to_rfc3339(),
                }))
                .await?;
            Ok(())
        },
    );

    api.register_all("boom", |_ctx, _req: serde_json::Value, _responder| async {
        Err("kaboom".into())
    });
}
