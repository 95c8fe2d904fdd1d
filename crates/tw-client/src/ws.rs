//! WebSocket client transport.
//!
//! One binary WS message carries one envelope.  A single task owns the
//! socket, so outbound frames are serialized and pings can be answered
//! in place.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::link::{LINK_QUEUE_DEPTH, TransportLink};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) async fn connect(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<TransportLink, ClientError> {
    let request = build_request(url, headers)?;
    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ClientError::Connect(e.to_string()))?;

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let task = tokio::spawn(socket_loop(ws, out_rx, in_tx, shutdown_rx));

    Ok(TransportLink {
        outbound: out_tx,
        inbound: in_rx,
        shutdown: shutdown_tx,
        tasks: vec![task],
    })
}

async fn socket_loop(
    mut ws: WsStream,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    in_tx: mpsc::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = ws.send(Message::Close(None)).await;
                    break;
                }
            }
            Some(frame) = out_rx.recv() => {
                if ws.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "ws receive error");
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if in_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!("text frame on binary protocol, closing");
                        let _ = ws.send(Message::Close(None)).await;
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    // Dropping in_tx tells the engine the connection is gone.
}

/// Build the upgrade request, attaching the caller's extra headers.
fn build_request(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ClientError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Connect(format!("invalid URL '{url}': {e}")))?;

    for (name, value) in headers {
        let name: tokio_tungstenite::tungstenite::http::header::HeaderName = name
            .parse()
            .map_err(|e| ClientError::Connect(format!("invalid header name '{name}': {e}")))?;
        let value = value
            .parse()
            .map_err(|e| ClientError::Connect(format!("invalid header value for '{name}': {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}
