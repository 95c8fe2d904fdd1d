// tw-test-utils: Shared test harness for the RPC framework suites.
//
// Provides a canned demo server (all three gateways on ephemeral ports,
// the canonical ping/echo/boom handlers) and a raw TCP probe for
// hand-crafted frames.

pub mod auth;
pub mod demo_server;
pub mod probe;

pub use auth::BearerAuthenticator;
pub use demo_server::DemoServer;
pub use probe::RawTcpProbe;

use tokio::net::TcpListener;

/// Pick a free TCP port.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    port
}
