//! Requests for unregistered command ids are answered with the exact
//! unsupported-command error and the connection stays open.

use tw_client::{ClientError, ClientOptions, RpcClient};
use tw_protocol::{Envelope, FrameKind, decode, encode};
use tw_test_utils::{DemoServer, RawTcpProbe};

/// A hand-crafted request with a known request id gets the error
/// envelope back with both correlation fields echoed.
#[tokio::test]
async fn unknown_command_error_echoes_correlation_fields() {
    let server = DemoServer::start().await;

    let mut probe = RawTcpProbe::connect(&server.tcp_addr()).await.unwrap();
    let request = Envelope::request_with_id("does.not.exist", "r1", b"{}".to_vec());
    probe.write_frame(&encode(&request).unwrap()).await.unwrap();

    let reply = decode(&probe.read_frame().await.expect("error reply")).unwrap();
    assert_eq!(reply.id, "does.not.exist");
    assert_eq!(reply.kind, FrameKind::Error);
    assert_eq!(reply.request_id.as_deref(), Some("r1"));
    assert_eq!(
        reply.error_reason().as_deref(),
        Some("Command 'does.not.exist' not supported")
    );

    // The connection survives: a valid ping on the same socket works.
    let ping = Envelope::request_with_id("ping", "r2", b"{\"message\":\"still here\"}".to_vec());
    probe.write_frame(&encode(&ping).unwrap()).await.unwrap();
    let pong = decode(&probe.read_frame().await.expect("pong")).unwrap();
    assert_eq!(pong.kind, FrameKind::Response);
    assert_eq!(pong.request_id.as_deref(), Some("r2"));

    server.shutdown().await;
}

/// Through the client engine the same failure surfaces as a remote
/// error carrying the reason string.
#[tokio::test]
async fn unknown_command_surfaces_as_remote_error() {
    let server = DemoServer::start().await;
    let client = RpcClient::new(ClientOptions::ws(server.ws_url()));
    client.connect().await.unwrap();

    let result: Result<serde_json::Value, _> = client
        .requester("does.not.exist")
        .send_request(&serde_json::json!({}))
        .await;
    match result {
        Err(ClientError::Remote(reason)) => {
            assert_eq!(reason, "Command 'does.not.exist' not supported");
        }
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }

    client.close().await;
    server.shutdown().await;
}
