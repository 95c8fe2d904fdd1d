//! Server registration surface and gateway starters.
//!
//! A host process builds one [`ServerApi`], registers handlers by command
//! id, mounts [`ServerApi::ws_router`] into its HTTP pipeline, and starts
//! the TCP and KCP gateways it wants.  All three transports share the
//! handler and connection registries owned here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::warn;
use tw_protocol::TransportKind;

use crate::config::ServerOptions;
use crate::connections::ConnectionRegistry;
use crate::context::{Authenticator, ConnectionContext, Principal};
use crate::kcp::KcpGateway;
use crate::registry::{HandlerRegistry, HandlerResult};
use crate::responder::{Broadcaster, Responder};
use crate::tcp::TcpGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared server state: options, registries, the optional authenticator,
/// and the shutdown signal observed by every connection worker.
pub struct ServerApi {
    options: ServerOptions,
    handlers: Arc<HandlerRegistry>,
    connections: Arc<ConnectionRegistry>,
    authenticator: Option<Arc<dyn Authenticator>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerApi {
    pub fn new(options: ServerOptions) -> Arc<Self> {
        Self::build(options, None)
    }

    pub fn with_authenticator(
        options: ServerOptions,
        authenticator: Arc<dyn Authenticator>,
    ) -> Arc<Self> {
        Self::build(options, Some(authenticator))
    }

    fn build(options: ServerOptions, authenticator: Option<Arc<dyn Authenticator>>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(ServerApi {
            options,
            handlers: Arc::new(HandlerRegistry::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            authenticator,
            shutdown_tx,
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub(crate) fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub(crate) fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve the principal for a connection's headers.  Returns `None`
    /// unless authentication is enabled and the host installed an
    /// authenticator.
    pub(crate) fn authenticate(&self, headers: &HashMap<String, String>) -> Option<Principal> {
        if !self.options.security.enable_authentication {
            return None;
        }
        self.authenticator.as_ref()?.authenticate(headers)
    }

    // -----------------------------------------------------------------------
    // Handler registration
    // -----------------------------------------------------------------------

    pub fn register_ws<Req, F, Fut>(&self, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(TransportKind::Ws, command_id, handler);
    }

    pub fn register_tcp<Req, F, Fut>(&self, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(TransportKind::Tcp, command_id, handler);
    }

    pub fn register_kcp<Req, F, Fut>(&self, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(TransportKind::Kcp, command_id, handler);
    }

    /// Register one handler on every transport.
    pub fn register_all<Req, F, Fut>(&self, command_id: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Arc<ConnectionContext>, Req, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register_all(command_id, handler);
    }

    // -----------------------------------------------------------------------
    // Push and lifecycle
    // -----------------------------------------------------------------------

    /// Obtain a push handle scoped to one (transport, command id) pair.
    pub fn broadcaster(&self, transport: TransportKind, command_id: &str) -> Broadcaster {
        Broadcaster::new(command_id.to_owned(), transport, self.connections.clone())
    }

    /// Build the axum router serving the configured WebSocket patterns.
    pub fn ws_router(self: &Arc<Self>) -> axum::Router {
        crate::ws::router(self.clone())
    }

    /// Start the length-prefixed TCP gateway on the configured port.
    pub async fn start_tcp(self: &Arc<Self>) -> Result<TcpGateway, GatewayError> {
        if self.options.security.require_authenticated_user {
            warn!("require_authenticated_user is set but the tcp transport cannot enforce it");
        }
        TcpGateway::start(self.clone()).await
    }

    /// Start the KCP gateway on the configured UDP port.
    pub async fn start_kcp(self: &Arc<Self>) -> Result<KcpGateway, GatewayError> {
        if self.options.security.require_authenticated_user {
            warn!("require_authenticated_user is set but the kcp transport cannot enforce it");
        }
        KcpGateway::start(self.clone()).await
    }

    /// Ask every live connection worker to close.  Gateways additionally
    /// have their own `shutdown()` that stops accepting first.
    pub fn close_all_connections(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
