//! Client connection options.

use std::collections::HashMap;
use std::time::Duration;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// WebSocket URL (`ws://` or `wss://`) plus extra request headers,
    /// e.g. an `Authorization` header for the server's authenticator.
    Ws {
        url: String,
        headers: HashMap<String, String>,
    },
    /// `host:port` of the length-prefixed TCP gateway.
    Tcp { addr: String },
    /// `host:port` of the KCP UDP gateway.
    Kcp { addr: String },
}

/// Options for one [`RpcClient`](crate::RpcClient).
///
/// The constructors apply the standard timeouts: 10 s to connect, 20 s
/// per correlated request, auto-reconnect on with unlimited retries.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: Endpoint,
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up; `0` means retry forever.
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientOptions {
    fn with_endpoint(endpoint: Endpoint) -> Self {
        ClientOptions {
            endpoint,
            auto_reconnect: true,
            max_retries: 0,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(20),
        }
    }

    pub fn ws(url: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Ws {
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    pub fn ws_with_headers(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self::with_endpoint(Endpoint::Ws {
            url: url.into(),
            headers,
        })
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Tcp { addr: addr.into() })
    }

    pub fn kcp(addr: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Kcp { addr: addr.into() })
    }
}

/// Backoff schedule for reconnect attempt `retry` (1-based):
/// `min(2^(retry-1), 60)` seconds.
pub(crate) fn backoff_delay(retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(6);
    Duration::from_secs((1u64 << exponent).min(60))
}
