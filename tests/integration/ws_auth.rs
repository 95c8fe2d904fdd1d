//! WebSocket upgrade authentication: 401 refusal without a principal,
//! principal pass-through to handlers with one.

use std::collections::HashMap;

use tw_client::{ClientError, ClientOptions, RpcClient};
use tw_test_utils::DemoServer;

const TOKENS: &[(&str, &str)] = &[("tok-alice", "alice"), ("tok-bob", "bob")];

/// Without credentials the upgrade is refused before any socket exists.
#[tokio::test]
async fn unauthenticated_upgrade_is_refused() {
    let server = DemoServer::start_secured(TOKENS).await;

    let mut options = ClientOptions::ws(server.ws_url());
    options.auto_reconnect = false;
    let client = RpcClient::new(options);
    let result = client.connect().await;
    match result {
        Err(ClientError::Connect(reason)) => {
            assert!(reason.contains("401"), "expected a 401 refusal, got: {reason}");
        }
        other => panic!("expected connect failure, got {:?}", other),
    }

    server.shutdown().await;
}

/// A wrong token is refused the same way as no token.
#[tokio::test]
async fn wrong_token_is_refused() {
    let server = DemoServer::start_secured(TOKENS).await;

    let headers = HashMap::from([("authorization".to_owned(), "Bearer nope".to_owned())]);
    let mut options = ClientOptions::ws_with_headers(server.ws_url(), headers);
    options.auto_reconnect = false;
    let client = RpcClient::new(options);
    assert!(matches!(
        client.connect().await,
        Err(ClientError::Connect(_))
    ));

    server.shutdown().await;
}

/// A valid bearer token upgrades, and the minted principal is visible
/// to handlers through the connection context.
#[tokio::test]
async fn bearer_token_attaches_principal() {
    let server = DemoServer::start_secured(TOKENS).await;

    let headers = HashMap::from([("authorization".to_owned(), "Bearer tok-alice".to_owned())]);
    let client = RpcClient::new(ClientOptions::ws_with_headers(server.ws_url(), headers));
    client.connect().await.unwrap();

    let reply: serde_json::Value = client
        .requester("whoami")
        .send_request(&serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(reply["transport"], "ws");
    assert_eq!(reply["principal"], "alice");

    client.close().await;
    server.shutdown().await;
}

/// Without the requirement, anonymous connections carry no principal
/// but are served.
#[tokio::test]
async fn anonymous_allowed_when_not_required() {
    let server = DemoServer::start().await;

    let client = RpcClient::new(ClientOptions::ws(server.ws_url()));
    client.connect().await.unwrap();

    let reply: serde_json::Value = client
        .requester("whoami")
        .send_request(&serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(reply["principal"], serde_json::Value::Null);

    client.close().await;
    server.shutdown().await;
}
