//! Reply capabilities handed to applications.
//!
//! A [`Responder`] is bound to one inbound envelope and answers it; a
//! [`Broadcaster`] is bound to a command id and pushes to any named
//! connection.  They overlap on purpose: a saved responder is already
//! correlated to a request id, a broadcaster never is.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use tw_protocol::{Envelope, TransportKind, encode};

use crate::connections::{ConnectionRegistry, SendError};

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Reply handle for one inbound envelope.
///
/// Handlers may call it before returning, or stash it and reply later
/// (server push after correlation).  When the inbound request carried a
/// `request_id` the responder is terminal: the first `send`/`send_error`
/// wins and any further attempt is dropped with a warning.  Responders for
/// uncorrelated requests are reusable push handles.
#[derive(Clone)]
pub struct Responder {
    command_id: String,
    request_id: Option<String>,
    conn_id: String,
    transport: TransportKind,
    outbound: mpsc::Sender<Vec<u8>>,
    replied: Arc<AtomicBool>,
}

impl Responder {
    pub(crate) fn new(
        command_id: String,
        request_id: Option<String>,
        conn_id: String,
        transport: TransportKind,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Responder {
            command_id,
            request_id,
            conn_id,
            transport,
            outbound,
            replied: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// True when this responder answers a correlated request and has not
    /// replied yet.  Claims the terminal slot when it returns true.
    fn claim_terminal(&self) -> bool {
        match self.request_id {
            Some(_) => !self.replied.swap(true, Ordering::SeqCst),
            None => true,
        }
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), SendError> {
        let bytes = encode(envelope)?;
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| SendError::ConnectionClosed)
    }

    /// Emit the `RESPONSE` envelope for this request, echoing its
    /// `request_id` when present.
    pub async fn send<T: Serialize>(&self, body: &T) -> Result<(), SendError> {
        if !self.claim_terminal() {
            warn!(
                command_id = %self.command_id,
                conn_id = %self.conn_id,
                transport = %self.transport,
                "duplicate reply dropped"
            );
            return Ok(());
        }
        let data = serde_json::to_vec(body)?;
        let envelope = Envelope::response(self.command_id.clone(), self.request_id.clone(), data);
        self.send_envelope(&envelope).await
    }

    /// Emit the `ERROR` envelope for this request, echoing its
    /// `request_id` when present.  `reason` travels as UTF-8.
    pub async fn send_error(&self, reason: &str) -> Result<(), SendError> {
        if !self.claim_terminal() {
            warn!(
                command_id = %self.command_id,
                conn_id = %self.conn_id,
                transport = %self.transport,
                "duplicate error reply dropped"
            );
            return Ok(());
        }
        let envelope = Envelope::error(self.command_id.clone(), self.request_id.clone(), reason);
        self.send_envelope(&envelope).await
    }
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Push handle scoped to one (transport, command id) pair.
///
/// Not tied to any inbound envelope; frames carry no `request_id`.
/// Delivery is addressed by connection id through the connection registry
/// and never blocks waiting for a peer.
#[derive(Clone)]
pub struct Broadcaster {
    command_id: String,
    transport: TransportKind,
    connections: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub(crate) fn new(
        command_id: String,
        transport: TransportKind,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Broadcaster {
            command_id,
            transport,
            connections,
        }
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Push a `RESPONSE` envelope to the named connection.
    pub fn send<T: Serialize>(&self, conn_id: &str, body: &T) -> Result<(), SendError> {
        let data = serde_json::to_vec(body)?;
        let envelope = Envelope::response(self.command_id.clone(), None, data);
        self.connections
            .try_send(self.transport, conn_id, encode(&envelope)?)
    }

    /// Push an `ERROR` envelope to the named connection.
    pub fn send_error(&self, conn_id: &str, reason: &str) -> Result<(), SendError> {
        let envelope = Envelope::error(self.command_id.clone(), None, reason);
        self.connections
            .try_send(self.transport, conn_id, encode(&envelope)?)
    }
}
