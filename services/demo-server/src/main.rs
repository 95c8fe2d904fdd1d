// demo-server: Host process wiring all three gateways.
//
// Usage: demo-server [options.toml [token-file]]
// Without a config file the documented defaults apply (WS on :5000 at
// /ws, TCP on :5003, KCP on :5004).  A token file enables bearer
// authentication on the WS gateway.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tw_server::{ServerApi, ServerOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "demo-server starting");

    let mut options = match std::env::args().nth(1) {
        Some(path) => match ServerOptions::load(Path::new(&path)) {
            Ok(options) => {
                info!(path = %path, "options loaded");
                options
            }
            Err(e) => {
                eprintln!("FATAL: failed to load options: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerOptions::default(),
    };

    let authenticator = match std::env::args().nth(2) {
        Some(path) => {
            match demo_server::auth::StaticTokenAuthenticator::from_file(Path::new(&path)) {
                Ok(auth) => {
                    info!(path = %path, tokens = auth.len(), "token file loaded");
                    options.security.enable_authentication = true;
                    Some(Arc::new(auth))
                }
                Err(e) => {
                    eprintln!("FATAL: failed to load token file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => None,
    };

    let api = match authenticator {
        Some(auth) => ServerApi::with_authenticator(options, auth),
        None => ServerApi::new(options),
    };
    demo_server::handlers::register_handlers(&api);

    let tcp = match api.start_tcp().await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "tcp gateway failed to start");
            std::process::exit(1);
        }
    };
    let kcp = match api.start_kcp().await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "kcp gateway failed to start");
            std::process::exit(1);
        }
    };

    let (push_shutdown_tx, push_shutdown_rx) = tokio::sync::watch::channel(false);
    let push_task =
        demo_server::push::spawn_time_push(api.clone(), Duration::from_secs(5), push_shutdown_rx);

    let router = api.ws_router();
    let listener = match tokio::net::TcpListener::bind("0.0.0.0:5000").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "http listener failed to bind");
            std::process::exit(1);
        }
    };
    info!(
        ws = "0.0.0.0:5000",
        tcp = %tcp.local_addr(),
        kcp = %kcp.local_addr(),
        "demo-server ready"
    );

    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    });
    if let Err(e) = serve.await {
        error!(error = %e, "http server error");
    }

    let _ = push_shutdown_tx.send(true);
    let _ = push_task.await;
    api.close_all_connections();
    tcp.shutdown().await;
    kcp.shutdown().await;
    info!("demo-server stopped");
}
