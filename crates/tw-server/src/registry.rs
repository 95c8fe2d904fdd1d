//! Handler registry: (transport, command id) → typed handler.
//!
//! The payload decoder is bound at registration time and stored as part
//! of the handler closure, so routing an inbound frame is a single map
//! lookup with no per-frame type discovery.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use tracing::warn;
use tw_protocol::{Envelope, TransportKind};

use crate::context::ConnectionContext;
use crate::responder::Responder;

/// What a handler resolves to.  `Err` becomes an `ERROR` reply carrying
/// `Handler error: <reason>`; the connection stays open either way.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Type-erased handler row.  Typed registration wraps the application
/// closure with its decoder; raw registration gets the whole envelope.
pub type RawHandler =
    Arc<dyn Fn(Arc<ConnectionContext>, Envelope, Responder) -> HandlerFuture + Send + Sync>;

/// Wrap a typed handler and its serde_json decoder into a [`RawHandler`].
fn erase<Req, F, Fut>(handler: F) -> RawHandler
where
    Req: DeserializeOwned + Send + 'static,
    F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(
        move |ctx: Arc<ConnectionContext>, envelope: Envelope, responder: Responder| -> HandlerFuture {
            match serde_json::from_slice::<Req>(&envelope.data) {
                Ok(body) => Box::pin(handler(ctx, body, responder)),
                Err(e) => Box::pin(async move { Err(format!("invalid payload: {e}").into()) }),
            }
        },
    )
}

/// Registry of handler rows, shared read-mostly by every gateway.
///
/// Registration is expected at process start but is safe at any time;
/// the last registration for a key wins and the overwrite is logged.
#[derive(Default)]
pub struct HandlerRegistry {
    rows: RwLock<HashMap<(TransportKind, String), RawHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a type-erased handler for one transport.
    pub fn register_raw(&self, transport: TransportKind, command_id: &str, handler: RawHandler) {
        let replaced = self
            .rows
            .write()
            .expect("handler registry lock poisoned")
            .insert((transport, command_id.to_owned()), handler);
        if replaced.is_some() {
            warn!(transport = %transport, command_id = %command_id, "handler overwritten");
        }
    }

    /// Install a typed handler for one transport; the serde_json decoder
    /// for `Req` is bound here.
    pub fn register<Req, F, Fut>(&self, transport: TransportKind, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_raw(transport, command_id, erase(handler));
    }

    /// Install one typed handler on every transport.
    pub fn register_all<Req, F, Fut>(&self, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let raw = erase(handler);
        for transport in TransportKind::ALL {
            self.register_raw(transport, command_id, raw.clone());
        }
    }

    pub fn lookup(&self, transport: TransportKind, command_id: &str) -> Option<RawHandler> {
        self.rows
            .read()
            .expect("handler registry lock poisoned")
            .get(&(transport, command_id.to_owned()))
            .cloned()
    }
}
