// tw-protocol: Wire envelope and binary codec shared by every transport.
//
// One envelope per wire message on all three transports.  The envelope is
// a compact tagged record; how it is delimited on the wire is the
// transport's business (one WebSocket binary frame, one length-prefixed
// TCP record, one reliable KCP message).
//
// # Correlation rules
// - `id` is the application command identifier and is never empty.
// - `request_id` is present on requests that expect a reply, and a reply
//   (`Response` or `Error`) echoes both `id` and `request_id` of the
//   request it answers.
// - For `Error` frames, `data` is the UTF-8 reason string.

use serde::{Deserialize, Serialize};

/// Hard ceiling on an encoded frame, shared by all transports.
///
/// The TCP gateway closes connections announcing a larger length prefix;
/// the codec refuses to produce or accept frames beyond it.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Reserved command id used for protocol-level error replies when the
/// inbound frame was too malformed to recover a command id from.
pub const PROTOCOL_ERROR_ID: &str = "protocol.error";

// ---------------------------------------------------------------------------
// Transport tags
// ---------------------------------------------------------------------------

/// The three wire transports an envelope can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Ws,
    Tcp,
    Kcp,
}

impl TransportKind {
    /// All transports, in registration fan-out order.
    pub const ALL: [TransportKind; 3] = [TransportKind::Ws, TransportKind::Tcp, TransportKind::Kcp];

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Ws => "ws",
            TransportKind::Tcp => "tcp",
            TransportKind::Kcp => "kcp",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Frame discriminator.  Requests flow toward the handler side; responses
/// and errors flow back, echoing the request's correlation fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Request,
    Response,
    Error,
}

/// The single wire object.
///
/// `data` is opaque to this crate; by convention the application encodes
/// payload bodies as JSON, and `Error` frames carry a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Command identifier; application-defined namespace, never empty.
    pub id: String,
    /// Correlation token; set on requests expecting a reply and echoed
    /// verbatim on the reply.
    pub request_id: Option<String>,
    pub kind: FrameKind,
    pub data: Vec<u8>,
}

impl Envelope {
    /// A fire-and-forget request (no reply expected, no correlation).
    pub fn request(id: impl Into<String>, data: Vec<u8>) -> Self {
        Envelope {
            id: id.into(),
            request_id: None,
            kind: FrameKind::Request,
            data,
        }
    }

    /// A correlated request carrying a caller-minted request id.
    pub fn request_with_id(
        id: impl Into<String>,
        request_id: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Envelope {
            id: id.into(),
            request_id: Some(request_id.into()),
            kind: FrameKind::Request,
            data,
        }
    }

    /// A response frame with explicit correlation fields.
    pub fn response(id: impl Into<String>, request_id: Option<String>, data: Vec<u8>) -> Self {
        Envelope {
            id: id.into(),
            request_id,
            kind: FrameKind::Response,
            data,
        }
    }

    /// An error frame; `reason` travels as UTF-8 in `data`.
    pub fn error(id: impl Into<String>, request_id: Option<String>, reason: &str) -> Self {
        Envelope {
            id: id.into(),
            request_id,
            kind: FrameKind::Error,
            data: reason.as_bytes().to_vec(),
        }
    }

    /// Build the response answering `self`, echoing `id` and `request_id`.
    pub fn reply(&self, data: Vec<u8>) -> Self {
        Envelope::response(self.id.clone(), self.request_id.clone(), data)
    }

    /// Build the error answering `self`, echoing `id` and `request_id`.
    pub fn reply_error(&self, reason: &str) -> Self {
        Envelope::error(self.id.clone(), self.request_id.clone(), reason)
    }

    /// The reason string of an `Error` frame (lossy UTF-8).
    /// Returns `None` for other frame kinds.
    pub fn error_reason(&self) -> Option<String> {
        match self.kind {
            FrameKind::Error => Some(String::from_utf8_lossy(&self.data).into_owned()),
            _ => None,
        }
    }
}

/// Mint a fresh correlation token.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("envelope command id is empty")]
    EmptyCommandId,
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte ceiling")]
    FrameTooLarge { len: usize },
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Encode an envelope to its wire bytes.
///
/// Enforces the non-empty-id invariant and the frame-size ceiling so a
/// misbehaving caller cannot emit a frame the peer is obligated to drop.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if envelope.id.is_empty() {
        return Err(CodecError::EmptyCommandId);
    }
    let bytes = bincode::serialize(envelope)?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge { len: bytes.len() });
    }
    Ok(bytes)
}

/// Decode wire bytes into an envelope, validating the same invariants
/// `encode` enforces.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge { len: bytes.len() });
    }
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.id.is_empty() {
        return Err(CodecError::EmptyCommandId);
    }
    Ok(envelope)
}
