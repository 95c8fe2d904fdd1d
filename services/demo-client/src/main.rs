// demo-client: CLI exercising the RPC client over a chosen transport.

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tw_client::{ClientOptions, RpcClient};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Ws,
    Tcp,
    Kcp,
}

#[derive(Parser)]
#[command(name = "demo-client", about = "Exercise a triwire server")]
struct Args {
    /// Transport to connect over.
    #[arg(long, value_enum, default_value = "ws")]
    transport: Transport,

    /// WS URL (for --transport ws), e.g. ws://127.0.0.1:5000/ws
    #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
    url: String,

    /// host:port (for --transport tcp/kcp)
    #[arg(long, default_value = "127.0.0.1:5003")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One correlated ping round trip.
    Ping {
        #[arg(default_value = "hi")]
        message: String,
    },
    /// Subscribe to server pushes and print them until ctrl-c.
    Listen,
    /// Send `count` correlated pings and report failures.
    Flood {
        #[arg(default_value_t = 100)]
        count: u32,
    },
}

fn client_options(args: &Args) -> ClientOptions {
    match args.transport {
        Transport::Ws => ClientOptions::ws(args.url.clone()),
        Transport::Tcp => ClientOptions::tcp(args.addr.clone()),
        Transport::Kcp => ClientOptions::kcp(args.addr.clone()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client = RpcClient::new(client_options(&args));
    client.on_connect(|| info!("connected"));
    client.on_disconnect(|| info!("disconnected"));

    if let Err(e) = client.connect().await {
        eprintln!("FATAL: connect failed: {}", e);
        std::process::exit(1);
    }

    match args.command {
        Command::Ping { message } => {
            let ping = client.requester("ping");
            match ping
                .send_request::<_, serde_json::Value>(&serde_json::json!({"message": message}))
                .await
            {
                Ok(reply) => println!("{}", reply),
                Err(e) => {
                    eprintln!("ping failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Listen => {
            let _time = client.register("server.time", |body: serde_json::Value| {
                println!("server.time: {}", body);
            });
            let _messages = client.register_with_error_handler(
                "message.test",
                |body: serde_json::Value| println!("message.test: {}", body),
                |reason| eprintln!("message.test error: {}", reason),
            );
            info!("listening, ctrl-c to stop");
            let _ = tokio::signal::ctrl_c().await;
        }
        Command::Flood { count } => {
            let ping = client.requester("ping");
            let mut failures = 0u32;
            for i in 0..count {
                let result = ping
                    .send_request::<_, serde_json::Value>(
                        &serde_json::json!({"message": format!("flood-{i}")}),
                    )
                    .await;
                if result.is_err() {
                    failures += 1;
                }
            }
            println!("{} requests, {} failures", count, failures);
            if failures > 0 {
                std::process::exit(1);
            }
        }
    }

    client.close().await;
}
