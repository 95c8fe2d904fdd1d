//! Framing violations close the offending connection without a reply
//! and without disturbing the listener.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tw_protocol::{Envelope, FrameKind, decode, encode};
use tw_test_utils::{DemoServer, RawTcpProbe};

/// Spec scenario: a `0xFFFFFFFF` length prefix closes the connection
/// silently; the next client connects and is served immediately.
#[tokio::test]
async fn huge_tcp_length_prefix_closes_silently() {
    let server = DemoServer::start().await;
    let addr = server.tcp_addr();

    let mut violator = RawTcpProbe::connect(&addr).await.unwrap();
    violator.write_raw(&u32::MAX.to_le_bytes()).await.unwrap();
    violator.write_raw(&[0xAB; 64]).await.unwrap();
    assert!(
        violator.expect_silent_close(Duration::from_secs(5)).await,
        "server must close without replying"
    );

    let mut next = RawTcpProbe::connect(&addr).await.unwrap();
    let ping = Envelope::request_with_id("ping", "r1", b"{\"message\":\"ok\"}".to_vec());
    next.write_frame(&encode(&ping).unwrap()).await.unwrap();
    let reply = decode(&next.read_frame().await.expect("service continues")).unwrap();
    assert_eq!(reply.kind, FrameKind::Response);

    server.shutdown().await;
}

/// A zero length prefix is equally fatal for the connection.
#[tokio::test]
async fn zero_tcp_length_prefix_closes_silently() {
    let server = DemoServer::start().await;

    let mut violator = RawTcpProbe::connect(&server.tcp_addr()).await.unwrap();
    violator.write_raw(&0u32.to_le_bytes()).await.unwrap();
    assert!(violator.expect_silent_close(Duration::from_secs(5)).await);

    server.shutdown().await;
}

/// Malformed envelope bytes inside a well-formed frame keep the
/// connection open and produce a protocol-level error reply.
#[tokio::test]
async fn malformed_envelope_gets_protocol_error_reply() {
    let server = DemoServer::start().await;

    let mut probe = RawTcpProbe::connect(&server.tcp_addr()).await.unwrap();
    probe.write_frame(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    let reply = decode(&probe.read_frame().await.expect("protocol error reply")).unwrap();
    assert_eq!(reply.id, tw_protocol::PROTOCOL_ERROR_ID);
    assert_eq!(reply.kind, FrameKind::Error);

    // Connection is still usable.
    let ping = Envelope::request_with_id("ping", "r1", b"{\"message\":\"still\"}".to_vec());
    probe.write_frame(&encode(&ping).unwrap()).await.unwrap();
    let pong = decode(&probe.read_frame().await.expect("pong")).unwrap();
    assert_eq!(pong.request_id.as_deref(), Some("r1"));

    server.shutdown().await;
}

/// A text frame on the WebSocket transport closes the socket with the
/// InvalidMessageType reason.
#[tokio::test]
async fn ws_text_frame_closes_with_invalid_message_type() {
    let server = DemoServer::start().await;

    let (mut ws, _response) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    ws.send(Message::Text("not binary".into())).await.unwrap();

    let close = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("server should close promptly");

    let frame = close.expect("close frame with reason");
    assert_eq!(frame.reason.as_str(), "InvalidMessageType");

    server.shutdown().await;
}

/// Binary frames on the WebSocket transport are served normally (the
/// counterpart to the text-frame rejection).
#[tokio::test]
async fn ws_binary_frame_is_served() {
    let server = DemoServer::start().await;

    let (mut ws, _response) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .unwrap();
    let ping = Envelope::request_with_id("ping", "r-ws", b"{\"message\":\"raw\"}".to_vec());
    ws.send(Message::Binary(encode(&ping).unwrap().into()))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => return decode(&data).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected ws event: {other:?}"),
            }
        }
    })
    .await
    .expect("reply within timeout");
    assert_eq!(reply.kind, FrameKind::Response);
    assert_eq!(reply.request_id.as_deref(), Some("r-ws"));

    server.shutdown().await;
}
