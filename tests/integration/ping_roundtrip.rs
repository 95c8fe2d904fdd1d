//! Ping round trip on every transport: one correlated request, one
//! RESPONSE envelope with the matching request id, no ERROR.

use tw_client::{ClientOptions, RpcClient};
use tw_protocol::FrameKind;
use tw_test_utils::DemoServer;

async fn roundtrip(client: RpcClient) {
    client.connect().await.unwrap();

    let ping = client.requester("ping");
    let reply = ping
        .send_request_envelope(&serde_json::json!({"message": "hi"}))
        .await
        .unwrap();

    assert_eq!(reply.kind, FrameKind::Response);
    assert_eq!(reply.id, "ping");
    assert!(reply.request_id.is_some(), "reply must echo the request id");

    let body: serde_json::Value = serde_json::from_slice(&reply.data).unwrap();
    assert_eq!(body["message"], "Pong: hi");
    assert!(body["timestamp"].is_string());

    client.close().await;
}

#[tokio::test]
async fn ws_ping_roundtrip() {
    let server = DemoServer::start().await;
    roundtrip(RpcClient::new(ClientOptions::ws(server.ws_url()))).await;
    server.shutdown().await;
}

#[tokio::test]
async fn tcp_ping_roundtrip() {
    let server = DemoServer::start().await;
    roundtrip(RpcClient::new(ClientOptions::tcp(server.tcp_addr()))).await;
    server.shutdown().await;
}

#[tokio::test]
async fn kcp_ping_roundtrip() {
    let server = DemoServer::start().await;
    roundtrip(RpcClient::new(ClientOptions::kcp(server.kcp_addr()))).await;
    server.shutdown().await;
}

/// Concurrent correlated requests on one connection resolve by request
/// id, not arrival order.
#[tokio::test]
async fn concurrent_requests_correlate_by_request_id() {
    let server = DemoServer::start().await;
    let client = RpcClient::new(ClientOptions::tcp(server.tcp_addr()));
    client.connect().await.unwrap();

    let echo = client.requester("echo");
    let mut join_set = tokio::task::JoinSet::new();
    for i in 0..16 {
        let echo = echo.clone();
        join_set.spawn(async move {
            let reply: serde_json::Value = echo
                .send_request(&serde_json::json!({"n": i}))
                .await
                .unwrap();
            assert_eq!(reply["n"], i);
        });
    }
    while let Some(result) = join_set.join_next().await {
        result.unwrap();
    }

    client.close().await;
    server.shutdown().await;
}
