//! Graceful shutdown: no listener stays bound, no connection survives.

use std::time::Duration;

use tw_client::{ClientOptions, ConnectionState, RpcClient};
use tw_protocol::TransportKind;
use tw_test_utils::DemoServer;

#[tokio::test]
async fn shutdown_closes_live_connections_and_releases_ports() {
    let server = DemoServer::start().await;
    let tcp_addr = server.tcp_addr();

    let mut tcp_options = ClientOptions::tcp(tcp_addr.clone());
    tcp_options.auto_reconnect = false;
    let tcp_client = RpcClient::new(tcp_options);
    tcp_client.connect().await.unwrap();

    let mut ws_options = ClientOptions::ws(server.ws_url());
    ws_options.auto_reconnect = false;
    let ws_client = RpcClient::new(ws_options);
    ws_client.connect().await.unwrap();

    // Both connections are live.
    assert_eq!(server.api().connections().count(TransportKind::Tcp), 1);
    let _: serde_json::Value = tcp_client
        .requester("ping")
        .send_request(&serde_json::json!({"message": "pre"}))
        .await
        .unwrap();

    server.shutdown().await;

    // Clients observe the close.
    for client in [&tcp_client, &ws_client] {
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.state() != ConnectionState::Disconnected {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("client should observe the shutdown");
    }

    // The TCP port is released and nothing accepts on it.
    let connect_result = tokio::net::TcpStream::connect(&tcp_addr).await;
    assert!(
        connect_result.is_err(),
        "no listener may remain after shutdown"
    );

    tcp_client.close().await;
    ws_client.close().await;
}

/// Shutting down one gateway leaves the others serving.
#[tokio::test]
async fn gateways_shut_down_independently() {
    let mut options = tw_server::ServerOptions::default();
    options.tcp_stream.port = 0;
    options.kcp.port = 0;
    let api = tw_server::ServerApi::new(options);
    api.register_all(
        "ping",
        |_ctx, _req: serde_json::Value, responder| async move {
            responder.send(&serde_json::json!({"ok": true})).await?;
            Ok(())
        },
    );

    let tcp = api.start_tcp().await.unwrap();
    let kcp = api.start_kcp().await.unwrap();
    let kcp_addr = format!("127.0.0.1:{}", kcp.local_addr().port());

    tcp.shutdown().await;

    // KCP still answers after the TCP gateway is gone.
    let client = RpcClient::new(ClientOptions::kcp(kcp_addr));
    client.connect().await.unwrap();
    let reply: serde_json::Value = client
        .requester("ping")
        .send_request(&serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(reply["ok"], true);

    client.close().await;
    kcp.shutdown().await;
}
