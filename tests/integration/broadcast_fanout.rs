//! Broadcaster pushes reach exactly the addressed connection.

use std::time::Duration;

use tokio::sync::mpsc;
use tw_client::{ClientOptions, RpcClient};
use tw_protocol::TransportKind;
use tw_server::SendError;
use tw_test_utils::DemoServer;

/// Wait until the WS connection registry reaches `expected` entries and
/// return the snapshot.
async fn await_ws_connections(server: &DemoServer, expected: usize) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ids = server.api().connections().snapshot(TransportKind::Ws);
            if ids.len() == expected {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection registry should settle")
}

fn listening_client(url: String) -> (RpcClient, mpsc::Receiver<serde_json::Value>) {
    let client = RpcClient::new(ClientOptions::ws(url));
    let (tx, rx) = mpsc::channel(16);
    let _requester = client.register("message.test", move |body: serde_json::Value| {
        let _ = tx.try_send(body);
    });
    (client, rx)
}

#[tokio::test]
async fn broadcast_reaches_only_the_addressed_connection() {
    let server = DemoServer::start().await;

    let (client1, mut rx1) = listening_client(server.ws_url());
    client1.connect().await.unwrap();
    let ids_after_first = await_ws_connections(&server, 1).await;
    let conn1 = ids_after_first[0].clone();

    let (client2, mut rx2) = listening_client(server.ws_url());
    client2.connect().await.unwrap();
    await_ws_connections(&server, 2).await;

    let broadcaster = server
        .api()
        .broadcaster(TransportKind::Ws, "message.test");
    broadcaster
        .send(&conn1, &serde_json::json!({"message": "hello"}))
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), rx1.recv())
        .await
        .expect("conn1 should receive the push")
        .unwrap();
    assert_eq!(body["message"], "hello");

    // The other connection sees nothing.
    let leaked = tokio::time::timeout(Duration::from_millis(300), rx2.recv()).await;
    assert!(leaked.is_err(), "conn2 must not receive the push");

    // Once conn1 is gone, the broadcaster reports the miss.
    client1.close().await;
    await_ws_connections(&server, 1).await;
    let result = broadcaster.send(&conn1, &serde_json::json!({"message": "late"}));
    assert!(matches!(result, Err(SendError::ConnectionNotFound)));

    client2.close().await;
    server.shutdown().await;
}

/// A saved uncorrelated responder is the second push mechanism: a
/// handler stashes it and the server pushes through it later.
#[tokio::test]
async fn saved_responder_pushes_after_handler_return() {
    let server = DemoServer::start().await;

    // The subscribe handler parks its responder for later pushes.
    let (responder_tx, mut responder_rx) = mpsc::channel::<tw_server::Responder>(4);
    server.api().register_all(
        "feed.subscribe",
        move |_ctx, _req: serde_json::Value, responder| {
            let responder_tx = responder_tx.clone();
            async move {
                let _ = responder_tx.send(responder).await;
                Ok(())
            }
        },
    );

    let client = RpcClient::new(ClientOptions::tcp(server.tcp_addr()));
    let (push_tx, mut push_rx) = mpsc::channel(16);
    let feed = client.register("feed.subscribe", move |body: serde_json::Value| {
        let _ = push_tx.try_send(body);
    });
    client.connect().await.unwrap();

    // Fire-and-forget subscription: no request id, so the responder is
    // a reusable push handle.
    feed.send(&serde_json::json!({})).await.unwrap();
    let responder = tokio::time::timeout(Duration::from_secs(5), responder_rx.recv())
        .await
        .expect("handler should hand over its responder")
        .unwrap();

    for i in 0..3 {
        responder
            .send(&serde_json::json!({"tick": i}))
            .await
            .unwrap();
    }
    for i in 0..3 {
        let body = tokio::time::timeout(Duration::from_secs(5), push_rx.recv())
            .await
            .expect("push should arrive")
            .unwrap();
        assert_eq!(body["tick"], i);
    }

    client.close().await;
    server.shutdown().await;
}
