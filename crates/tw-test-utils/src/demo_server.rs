//! A complete server host on ephemeral ports, for integration suites.
//!
//! Registers the canonical demo handlers on every transport:
//! - `ping` → `{message: "Pong: <msg>", timestamp}`
//! - `echo` → the request body unchanged
//! - `boom` → fails with `kaboom`
//! - `whoami` → connection id, transport tag, principal
//!
//! `message.test` is reserved for broadcaster pushes and has no handler.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use tw_server::{ServerApi, ServerOptions};

pub struct DemoServer {
    api: Arc<ServerApi>,
    ws_addr: SocketAddr,
    tcp: Option<tw_server::TcpGateway>,
    kcp: Option<tw_server::KcpGateway>,
    ws_shutdown: watch::Sender<bool>,
    ws_task: JoinHandle<()>,
}

impl DemoServer {
    /// Start on fully ephemeral ports.
    pub async fn start() -> Self {
        Self::start_on(0, 0).await
    }

    /// Start with pinned TCP/KCP ports (0 = ephemeral).  Restart
    /// scenarios pin the port of the transport under test so a client
    /// can reconnect to the same address.
    pub async fn start_on(tcp_port: u16, kcp_port: u16) -> Self {
        Self::start_impl(tcp_port, kcp_port, None).await
    }

    /// Start with bearer-token authentication required on the WS
    /// gateway.  `tokens` maps bearer tokens to principal names.
    pub async fn start_secured(tokens: &[(&str, &str)]) -> Self {
        Self::start_impl(0, 0, Some(Arc::new(crate::auth::BearerAuthenticator::new(tokens)))).await
    }

    async fn start_impl(
        tcp_port: u16,
        kcp_port: u16,
        authenticator: Option<Arc<dyn tw_server::Authenticator>>,
    ) -> Self {
        let mut options = ServerOptions::default();
        options.tcp_stream.port = tcp_port;
        options.kcp.port = kcp_port;
        // Fast pings keep suites short without changing behavior.
        options.web_socket.keep_alive_interval = 5;

        let api = match authenticator {
            Some(authenticator) => {
                options.security.enable_authentication = true;
                options.security.require_authenticated_user = true;
                ServerApi::with_authenticator(options, authenticator)
            }
            None => ServerApi::new(options),
        };
        register_demo_handlers(&api);

        let tcp = api.start_tcp().await.expect("tcp gateway");
        let kcp = api.start_kcp().await.expect("kcp gateway");

        let router = api.ws_router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ws listener");
        let ws_addr = listener.local_addr().expect("ws local addr");
        let (ws_shutdown, mut ws_shutdown_rx) = watch::channel(false);
        let ws_task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = ws_shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "demo ws server exited with error");
            }
        });

        DemoServer {
            api,
            ws_addr,
            tcp: Some(tcp),
            kcp: Some(kcp),
            ws_shutdown,
            ws_task,
        }
    }

    pub fn api(&self) -> &Arc<ServerApi> {
        &self.api
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.ws_addr)
    }

    pub fn tcp_addr(&self) -> String {
        self.tcp
            .as_ref()
            .expect("tcp gateway running")
            .local_addr()
            .to_string()
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp.as_ref().expect("tcp gateway running").local_addr().port()
    }

    pub fn kcp_addr(&self) -> String {
        let addr = self.kcp.as_ref().expect("kcp gateway running").local_addr();
        format!("127.0.0.1:{}", addr.port())
    }

    /// Stop everything: gateways, live connections, and the HTTP host.
    pub async fn shutdown(mut self) {
        self.api.close_all_connections();
        if let Some(tcp) = self.tcp.take() {
            tcp.shutdown().await;
        }
        if let Some(kcp) = self.kcp.take() {
            kcp.shutdown().await;
        }
        let _ = self.ws_shutdown.send(true);
        let _ = self.ws_task.await;
    }
}

fn register_demo_handlers(api: &Arc<ServerApi>) {
    api.register_all(
        "ping",
        |_ctx, req: serde_json::Value, responder| async move {
            let message = req["message"].as_str().unwrap_or_default();
            responder
                .send(&serde_json::json!({
                    "message": format!("Pong: {message}"),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }))
                .await?;
            Ok(())
        },
    );

    api.register_all(
        "echo",
        |_ctx, req: serde_json::Value, responder| async move {
            responder.send(&req).await?;
            Ok(())
        },
    );

    api.register_all("boom", |_ctx, _req: serde_json::Value, _responder| async {
        Err("kaboom".into())
    });

    api.register_all(
        "whoami",
        |ctx, _req: serde_json::Value, responder| async move {
            responder
                .send(&serde_json::json!({
                    "conn_id": ctx.conn_id,
                    "transport": ctx.transport.as_str(),
                    "principal": ctx.principal.as_ref().map(|p| p.name.clone()),
                }))
                .await?;
            Ok(())
        },
    );
}
