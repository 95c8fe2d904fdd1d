//! Inbound frame dispatch, shared by all three gateways.
//!
//! The dispatcher never blocks the connection's read loop: handlers run
//! on spawned tasks, and protocol-level error replies go through the
//! connection's outbound queue without waiting.
//!
//! Failure policy per frame (the connection stays open for all of these):
//! - undecodable frame → `ERROR` on the reserved `protocol.error` id
//! - no handler registered → `ERROR("Command '<id>' not supported")`
//! - handler returns `Err` or panics → `ERROR("Handler error: <reason>")`

use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tw_protocol::{Envelope, PROTOCOL_ERROR_ID, decode, encode};

use crate::context::ConnectionContext;
use crate::registry::HandlerRegistry;
use crate::responder::Responder;

/// Per-connection dispatch state: the shared handler registry plus this
/// connection's context and outbound queue.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    ctx: Arc<ConnectionContext>,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Dispatcher {
    pub(crate) fn new(
        handlers: Arc<HandlerRegistry>,
        ctx: Arc<ConnectionContext>,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Dispatcher {
            handlers,
            ctx,
            outbound,
        }
    }

    /// Route one inbound frame.  Returns immediately; handler execution
    /// continues on its own task.
    pub(crate) fn dispatch(&self, bytes: Vec<u8>) {
        let envelope = match decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    conn_id = %self.ctx.conn_id,
                    transport = %self.ctx.transport,
                    error = %e,
                    "undecodable inbound frame"
                );
                self.try_reply(Envelope::error(
                    PROTOCOL_ERROR_ID,
                    None,
                    &format!("malformed envelope: {e}"),
                ));
                return;
            }
        };

        let Some(handler) = self.handlers.lookup(self.ctx.transport, &envelope.id) else {
            debug!(
                conn_id = %self.ctx.conn_id,
                command_id = %envelope.id,
                "no handler registered"
            );
            self.try_reply(envelope.reply_error(&format!("Command '{}' not supported", envelope.id)));
            return;
        };

        let responder = Responder::new(
            envelope.id.clone(),
            envelope.request_id.clone(),
            self.ctx.conn_id.clone(),
            self.ctx.transport,
            self.outbound.clone(),
        );
        let failure_responder = responder.clone();
        let command_id = envelope.id.clone();
        let conn_id = self.ctx.conn_id.clone();
        let fut = handler(self.ctx.clone(), envelope, responder);

        tokio::spawn(async move {
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if let Err(send_err) = failure_responder
                        .send_error(&format!("Handler error: {e}"))
                        .await
                    {
                        debug!(conn_id = %conn_id, error = %send_err, "failure reply undeliverable");
                    }
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    warn!(
                        conn_id = %conn_id,
                        command_id = %command_id,
                        reason = %reason,
                        "handler panicked"
                    );
                    let _ = failure_responder
                        .send_error(&format!("Handler error: {reason}"))
                        .await;
                }
            }
        });
    }

    /// Queue a protocol-level reply without blocking the read loop.
    fn try_reply(&self, envelope: Envelope) {
        match encode(&envelope) {
            Ok(bytes) => {
                if self.outbound.try_send(bytes).is_err() {
                    debug!(conn_id = %self.ctx.conn_id, "protocol reply dropped, outbound queue unavailable");
                }
            }
            Err(e) => warn!(conn_id = %self.ctx.conn_id, error = %e, "protocol reply encode failed"),
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
