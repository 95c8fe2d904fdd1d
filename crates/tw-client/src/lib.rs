// tw-client: Client side of the command RPC framework.
//
// Symmetric with the server: register handlers by command id, then send
// fire-and-forget or correlated requests through a `Requester`.  The
// engine owns one live transport link at a time and transparently swaps
// it on reconnect; requesters keep working across the swap.
//
// # Quick start
// ```no_run
// # async fn demo() -> Result<(), tw_client::ClientError> {
// use tw_client::{ClientOptions, RpcClient};
//
// let client = RpcClient::new(ClientOptions::tcp("127.0.0.1:5003"));
// client.connect().await?;
// let ping = client.requester("ping");
// let reply: serde_json::Value = ping
//     .send_request(&serde_json::json!({"message": "hi"}))
//     .await?;
// # let _ = reply;
// # Ok(())
// # }
// ```

pub mod engine;
pub mod error;
pub mod options;

mod kcp;
mod link;
mod tcp;
mod ws;

pub use engine::{ConnectionState, Requester, RpcClient};
pub use error::ClientError;
pub use options::{ClientOptions, Endpoint};
