//! Reconnect transparency: a requester obtained before a server restart
//! keeps working after the backoff driver re-establishes the link.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tw_client::{ClientOptions, ConnectionState, RpcClient};
use tw_test_utils::{DemoServer, free_port};

async fn await_state(client: &RpcClient, state: ConnectionState, within: Duration) {
    tokio::time::timeout(within, async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client never reached {state:?}"));
}

#[tokio::test]
async fn requester_survives_server_restart() {
    let port = free_port().await;
    let server = DemoServer::start_on(port, 0).await;
    let addr = server.tcp_addr();

    let client = RpcClient::new(ClientOptions::tcp(addr));
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let c = connects.clone();
    client.on_connect(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let d = disconnects.clone();
    client.on_disconnect(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    client.connect().await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    // The requester under test is obtained before the restart.
    let ping = client.requester("ping");
    let reply: serde_json::Value = ping
        .send_request(&serde_json::json!({"message": "before"}))
        .await
        .unwrap();
    assert_eq!(reply["message"], "Pong: before");

    // Restart the server on the same port.
    server.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while disconnects.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("on_disconnect should fire");

    let server = DemoServer::start_on(port, 0).await;

    // Backoff starts at one second; allow a few rounds.
    await_state(&client, ConnectionState::Connected, Duration::from_secs(30)).await;
    assert!(connects.load(Ordering::SeqCst) >= 2, "on_connect fires per transition");

    // Same requester, no re-registration.
    let reply: serde_json::Value = ping
        .send_request(&serde_json::json!({"message": "x"}))
        .await
        .unwrap();
    assert_eq!(reply["message"], "Pong: x");

    client.close().await;
    server.shutdown().await;
}

/// With auto-reconnect off, a lost connection stays lost.
#[tokio::test]
async fn no_reconnect_when_disabled() {
    let server = DemoServer::start().await;
    let mut options = ClientOptions::tcp(server.tcp_addr());
    options.auto_reconnect = false;
    let client = RpcClient::new(options);
    client.connect().await.unwrap();

    server.shutdown().await;
    await_state(&client, ConnectionState::Disconnected, Duration::from_secs(5)).await;

    // Still disconnected well past the first backoff window.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.close().await;
}
