//! WebSocket gateway.
//!
//! Hooks into the host's HTTP pipeline as an axum router: one route per
//! configured pattern.  One binary WS message carries one envelope;
//! non-binary data frames close the socket with `InvalidMessageType`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tw_protocol::{MAX_FRAME_BYTES, TransportKind};

use crate::api::ServerApi;
use crate::connections::OUTBOUND_QUEUE_DEPTH;
use crate::context::{ConnectionContext, Principal};
use crate::dispatch::Dispatcher;

/// RFC 6455 close code for a data frame type the endpoint cannot accept.
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

/// Build the router serving every configured WS pattern.
pub(crate) fn router(api: Arc<ServerApi>) -> Router {
    let mut router = Router::new();
    for pattern in &api.options().web_socket.patterns {
        router = router.route(pattern, get(ws_handler));
    }
    router.with_state(api)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(api): State<Arc<ServerApi>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let headers = flatten_headers(&headers);
    let principal = api.authenticate(&headers);
    if !upgrade_allowed(
        api.options().security.require_authenticated_user,
        principal.as_ref(),
    ) {
        return (StatusCode::UNAUTHORIZED, "authenticated user required").into_response();
    }

    ws.max_message_size(MAX_FRAME_BYTES)
        .write_buffer_size(api.options().web_socket.buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, api, headers, query, principal))
}

/// The upgrade gate: when `require_authenticated_user` is set, only an
/// authenticated principal may proceed.
fn upgrade_allowed(require_authenticated: bool, principal: Option<&Principal>) -> bool {
    !require_authenticated || principal.is_some_and(|p| p.authenticated)
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                value.to_str().unwrap_or_default().to_owned(),
            )
        })
        .collect()
}

async fn handle_socket(
    mut socket: WebSocket,
    api: Arc<ServerApi>,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    principal: Option<Principal>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
    api.connections()
        .register(TransportKind::Ws, &conn_id, out_tx.clone());

    let ctx = Arc::new(
        ConnectionContext::new(conn_id.clone(), TransportKind::Ws)
            .with_principal(principal)
            .with_headers(headers)
            .with_query(query),
    );
    let dispatcher = Dispatcher::new(api.handlers().clone(), ctx, out_tx);
    let mut shutdown = api.shutdown_watch();

    info!(conn_id = %conn_id, "ws connection open");

    let keep_alive = api.options().web_socket.keep_alive_interval;
    let ping_enabled = keep_alive > 0;
    let mut ping = tokio::time::interval(Duration::from_secs(keep_alive.max(1)));
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            Some(frame) = out_rx.recv() => {
                if socket.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick(), if ping_enabled => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "ws receive error");
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => dispatcher.dispatch(data.to_vec()),
                    Some(Ok(Message::Text(_))) => {
                        warn!(conn_id = %conn_id, "text frame on binary protocol, closing");
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_UNSUPPORTED_DATA,
                                reason: "InvalidMessageType".into(),
                            })))
                            .await;
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(conn_id = %conn_id, "ws closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    api.connections().unregister(TransportKind::Ws, &conn_id);
    info!(conn_id = %conn_id, "ws connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: the upgrade gate refuses only when required and the
    /// principal is missing or unauthenticated.
    #[test]
    fn upgrade_gate() {
        let authenticated = Principal {
            name: "alice".to_owned(),
            authenticated: true,
        };
        let anonymous = Principal {
            name: "guest".to_owned(),
            authenticated: false,
        };

        assert!(upgrade_allowed(false, None));
        assert!(upgrade_allowed(false, Some(&anonymous)));
        assert!(upgrade_allowed(true, Some(&authenticated)));
        assert!(!upgrade_allowed(true, None));
        assert!(!upgrade_allowed(true, Some(&anonymous)));
    }

    /// Test: header flattening lowercases names (HeaderMap semantics)
    /// and keeps values.
    #[test]
    fn header_flattening() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer tok".parse().unwrap());
        headers.insert("X-Room", "lobby".parse().unwrap());

        let flat = flatten_headers(&headers);
        assert_eq!(flat.get("authorization").map(String::as_str), Some("Bearer tok"));
        assert_eq!(flat.get("x-room").map(String::as_str), Some("lobby"));
    }

    /// Test: a router is constructible for multiple patterns.
    #[test]
    fn router_builds_for_all_patterns() {
        let mut options = crate::config::ServerOptions::default();
        options.web_socket.patterns = vec!["/ws".to_owned(), "/rpc".to_owned()];
        let api = ServerApi::new(options);
        let _router = router(api);
    }
}
