// tw-server: Server side of the command RPC framework.
//
// One dispatch model across three gateways.  A host process builds a
// `ServerApi`, registers handlers by command id, mounts the WebSocket
// router into its HTTP pipeline, and starts the TCP/KCP gateways it
// wants.  See the demo-server service for complete wiring.

pub mod api;
pub mod config;
pub mod connections;
pub mod context;
pub mod kcp;
pub mod registry;
pub mod responder;
pub mod tcp;
pub mod ws;

mod dispatch;

pub use api::{GatewayError, ServerApi};
pub use config::{ConfigError, KcpOptions, SecurityOptions, ServerOptions, TcpStreamOptions, WebSocketOptions};
pub use connections::{ConnectionRegistry, SendError};
pub use context::{Authenticator, ConnectionContext, Principal};
pub use kcp::KcpGateway;
pub use registry::{HandlerRegistry, HandlerResult};
pub use responder::{Broadcaster, Responder};
pub use tcp::TcpGateway;
