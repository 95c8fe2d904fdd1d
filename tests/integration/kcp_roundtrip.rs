//! KCP transport end to end: correlated requests, handler errors, and
//! server push over the UDP-based reliable transport.

use std::time::Duration;

use tokio::sync::mpsc;
use tw_client::{ClientError, ClientOptions, RpcClient};
use tw_protocol::TransportKind;
use tw_test_utils::DemoServer;

#[tokio::test]
async fn kcp_correlated_request_and_error() {
    let server = DemoServer::start().await;
    let client = RpcClient::new(ClientOptions::kcp(server.kcp_addr()));
    client.connect().await.unwrap();

    let reply: serde_json::Value = client
        .requester("ping")
        .send_request(&serde_json::json!({"message": "over udp"}))
        .await
        .unwrap();
    assert_eq!(reply["message"], "Pong: over udp");

    let result: Result<serde_json::Value, _> = client
        .requester("boom")
        .send_request(&serde_json::json!({}))
        .await;
    match result {
        Err(ClientError::Remote(reason)) => assert_eq!(reason, "Handler error: kaboom"),
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn kcp_server_push_reaches_the_client() {
    let server = DemoServer::start().await;

    let client = RpcClient::new(ClientOptions::kcp(server.kcp_addr()));
    let (push_tx, mut push_rx) = mpsc::channel(16);
    let _requester = client.register("message.test", move |body: serde_json::Value| {
        let _ = push_tx.try_send(body);
    });
    client.connect().await.unwrap();

    // The server learns about the session from the first datagram.
    let _: serde_json::Value = client
        .requester("ping")
        .send_request(&serde_json::json!({"message": "hello"}))
        .await
        .unwrap();

    let conn_ids = server.api().connections().snapshot(TransportKind::Kcp);
    assert_eq!(conn_ids.len(), 1);

    let broadcaster = server
        .api()
        .broadcaster(TransportKind::Kcp, "message.test");
    broadcaster
        .send(&conn_ids[0], &serde_json::json!({"message": "pushed"}))
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), push_rx.recv())
        .await
        .expect("push should arrive over kcp")
        .unwrap();
    assert_eq!(body["message"], "pushed");

    client.close().await;
    server.shutdown().await;
}

/// Two KCP clients are separate sessions with separate connection ids.
#[tokio::test]
async fn kcp_sessions_are_isolated_by_conv() {
    let server = DemoServer::start().await;

    let client_a = RpcClient::new(ClientOptions::kcp(server.kcp_addr()));
    let client_b = RpcClient::new(ClientOptions::kcp(server.kcp_addr()));
    client_a.connect().await.unwrap();
    client_b.connect().await.unwrap();

    let reply_a: serde_json::Value = client_a
        .requester("echo")
        .send_request(&serde_json::json!({"who": "a"}))
        .await
        .unwrap();
    let reply_b: serde_json::Value = client_b
        .requester("echo")
        .send_request(&serde_json::json!({"who": "b"}))
        .await
        .unwrap();
    assert_eq!(reply_a["who"], "a");
    assert_eq!(reply_b["who"], "b");

    assert_eq!(
        server.api().connections().count(TransportKind::Kcp),
        2,
        "each conv is its own connection record"
    );

    client_a.close().await;
    client_b.close().await;
    server.shutdown().await;
}
