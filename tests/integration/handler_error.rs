//! Handler failures become ERROR envelopes; the connection stays open.

use tw_client::{ClientError, ClientOptions, RpcClient};
use tw_test_utils::DemoServer;

/// The boom handler's failure reason reaches the caller with the
/// handler-error prefix, and a subsequent ping on the same connection
/// succeeds.
#[tokio::test]
async fn handler_error_keeps_the_connection_usable() {
    let server = DemoServer::start().await;
    let client = RpcClient::new(ClientOptions::tcp(server.tcp_addr()));
    client.connect().await.unwrap();

    let result: Result<serde_json::Value, _> = client
        .requester("boom")
        .send_request(&serde_json::json!({}))
        .await;
    match result {
        Err(ClientError::Remote(reason)) => assert_eq!(reason, "Handler error: kaboom"),
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }

    let reply: serde_json::Value = client
        .requester("ping")
        .send_request(&serde_json::json!({"message": "after boom"}))
        .await
        .unwrap();
    assert_eq!(reply["message"], "Pong: after boom");

    client.close().await;
    server.shutdown().await;
}

/// A handler that panics is contained the same way.
#[tokio::test]
async fn handler_panic_is_contained() {
    let server = DemoServer::start().await;
    server
        .api()
        .register_all("panic", |_ctx, _req: serde_json::Value, _responder| async {
            panic!("blew up")
        });

    let client = RpcClient::new(ClientOptions::tcp(server.tcp_addr()));
    client.connect().await.unwrap();

    let result: Result<serde_json::Value, _> = client
        .requester("panic")
        .send_request(&serde_json::json!({}))
        .await;
    match result {
        Err(ClientError::Remote(reason)) => assert_eq!(reason, "Handler error: blew up"),
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }

    // Connection still serves requests afterwards.
    let reply: serde_json::Value = client
        .requester("ping")
        .send_request(&serde_json::json!({"message": "alive"}))
        .await
        .unwrap();
    assert_eq!(reply["message"], "Pong: alive");

    client.close().await;
    server.shutdown().await;
}

/// A body the registered decoder rejects is reported as a handler
/// error without killing the connection.
#[tokio::test]
async fn undecodable_payload_is_a_handler_error() {
    let server = DemoServer::start().await;
    server.api().register_all(
        "strict",
        |_ctx, req: StrictBody, responder| async move {
            responder
                .send(&serde_json::json!({"got": req.message}))
                .await?;
            Ok(())
        },
    );

    let client = RpcClient::new(ClientOptions::tcp(server.tcp_addr()));
    client.connect().await.unwrap();

    // Missing required field -> decode failure inside the handler row.
    let result: Result<serde_json::Value, _> = client
        .requester("strict")
        .send_request(&serde_json::json!({"wrong": 1}))
        .await;
    match result {
        Err(ClientError::Remote(reason)) => {
            assert!(reason.starts_with("Handler error: invalid payload:"), "{reason}");
        }
        other => panic!("expected remote error, got {:?}", other.map(|_| ())),
    }

    client.close().await;
    server.shutdown().await;
}

#[derive(serde::Deserialize)]
struct StrictBody {
    message: String,
}
