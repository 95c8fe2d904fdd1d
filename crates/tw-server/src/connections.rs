//! Live-connection registry for broadcast routing.
//!
//! Each gateway registers a connection's outbound queue handle on accept
//! and removes it on close.  Broadcasters and saved responders route
//! through here; the registry never blocks a caller waiting for a slow or
//! reconnecting peer.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::debug;
use tw_protocol::TransportKind;

/// Depth of every per-connection outbound queue.  A connection that falls
/// this many frames behind starts failing sends with [`SendError::QueueFull`].
pub(crate) const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Failure modes of the non-blocking send path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection not found")]
    ConnectionNotFound,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection outbound queue full")]
    QueueFull,
    #[error(transparent)]
    Codec(#[from] tw_protocol::CodecError),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Connections keyed by transport, then by connection id.
///
/// Shards are independent locks so WS fan-out never contends with TCP
/// accept churn.  Values are the connections' outbound queue senders; the
/// socket-owning worker on the other end performs the actual framed write.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    ws: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    tcp: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
    kcp: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, transport: TransportKind) -> &RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>> {
        match transport {
            TransportKind::Ws => &self.ws,
            TransportKind::Tcp => &self.tcp,
            TransportKind::Kcp => &self.kcp,
        }
    }

    pub fn register(
        &self,
        transport: TransportKind,
        conn_id: &str,
        outbound: mpsc::Sender<Vec<u8>>,
    ) {
        let previous = self
            .shard(transport)
            .write()
            .expect("connection registry lock poisoned")
            .insert(conn_id.to_owned(), outbound);
        debug!(transport = %transport, conn_id = %conn_id, replaced = previous.is_some(), "connection registered");
    }

    pub fn unregister(&self, transport: TransportKind, conn_id: &str) {
        let removed = self
            .shard(transport)
            .write()
            .expect("connection registry lock poisoned")
            .remove(conn_id);
        debug!(transport = %transport, conn_id = %conn_id, known = removed.is_some(), "connection unregistered");
    }

    /// Hand `bytes` to the named connection's writer without blocking.
    ///
    /// Unknown ids fail with [`SendError::ConnectionNotFound`]; a closed or
    /// saturated outbound queue fails with `ConnectionClosed`/`QueueFull`.
    pub fn try_send(
        &self,
        transport: TransportKind,
        conn_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SendError> {
        let sender = {
            let shard = self
                .shard(transport)
                .read()
                .expect("connection registry lock poisoned");
            shard
                .get(conn_id)
                .cloned()
                .ok_or(SendError::ConnectionNotFound)?
        };
        sender.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ConnectionClosed,
        })
    }

    /// Snapshot of the live connection ids on one transport, for fan-out.
    pub fn snapshot(&self, transport: TransportKind) -> Vec<String> {
        self.shard(transport)
            .read()
            .expect("connection registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn count(&self, transport: TransportKind) -> usize {
        self.shard(transport)
            .read()
            .expect("connection registry lock poisoned")
            .len()
    }
}
