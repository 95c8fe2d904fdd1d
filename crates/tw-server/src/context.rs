//! Per-connection context handed to handlers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tw_protocol::TransportKind;

/// The identity attached to a connection by the host's [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub authenticated: bool,
}

/// Host-supplied authentication hook.
///
/// Runs once per connection at accept time, against the connection's
/// header map.  Only HTTP-upgrade transports carry real headers; TCP and
/// KCP connections present an empty map.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HashMap<String, String>) -> Option<Principal>;
}

/// Everything a handler may want to know about the connection an envelope
/// arrived on.  One record per live socket, owned by the connection
/// worker; handlers receive it behind an `Arc`.
#[derive(Debug)]
pub struct ConnectionContext {
    /// Process-unique, stable for the life of the socket.
    pub conn_id: String,
    pub transport: TransportKind,
    pub peer: Option<SocketAddr>,
    pub principal: Option<Principal>,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub connected_at: DateTime<Utc>,
    attributes: RwLock<HashMap<String, String>>,
}

impl ConnectionContext {
    pub fn new(conn_id: impl Into<String>, transport: TransportKind) -> Self {
        ConnectionContext {
            conn_id: conn_id.into(),
            transport,
            peer: None,
            principal: None,
            headers: HashMap::new(),
            query: HashMap::new(),
            connected_at: Utc::now(),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    /// Free-form per-connection state for applications.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .write()
            .expect("attribute lock poisoned")
            .insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .read()
            .expect("attribute lock poisoned")
            .get(key)
            .cloned()
    }
}
