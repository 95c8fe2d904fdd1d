//! The client engine: one active transport link, a handler registry, a
//! pending-request table, and the reconnect driver.
//!
//! Requesters hold the engine, not the link.  Every send re-resolves the
//! live link at call time, which is what lets a requester obtained before
//! a disconnect keep working after the reconnect driver has swapped the
//! socket underneath it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tw_protocol::{Envelope, FrameKind, decode, encode, new_request_id};

use crate::error::ClientError;
use crate::link::{LinkHandle, TransportLink};
use crate::options::{ClientOptions, Endpoint, backoff_delay};

/// Client connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One registered push handler: the payload decoder is baked into
/// `callback`; `on_error` receives unsolicited `ERROR` reasons.
#[derive(Clone)]
struct HandlerRow {
    callback: Arc<dyn Fn(Envelope) + Send + Sync>,
    on_error: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

type LifecycleHooks = RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>;

struct ClientInner {
    options: ClientOptions,
    state: RwLock<ConnectionState>,
    handlers: RwLock<HashMap<String, HandlerRow>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    outbound: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    link: tokio::sync::Mutex<Option<LinkHandle>>,
    reconnect_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    on_connect: LifecycleHooks,
    on_disconnect: LifecycleHooks,
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    fn fire(&self, hooks: &LifecycleHooks) {
        let hooks: Vec<_> = hooks.read().expect("hook lock poisoned").clone();
        for hook in hooks {
            hook();
        }
    }

    async fn send_frame(&self, bytes: Vec<u8>) -> Result<(), ClientError> {
        let sender = self
            .outbound
            .read()
            .expect("outbound lock poisoned")
            .clone()
            .ok_or(ClientError::NotConnected)?;
        sender
            .send(bytes)
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }
}

/// A symmetric RPC client over one of the three transports.
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(options: ClientOptions) -> RpcClient {
        RpcClient {
            inner: Arc::new(ClientInner {
                options,
                state: RwLock::new(ConnectionState::Disconnected),
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                outbound: RwLock::new(None),
                link: tokio::sync::Mutex::new(None),
                reconnect_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                on_connect: RwLock::new(Vec::new()),
                on_disconnect: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Connect (or no-op when already connected).  Times out after the
    /// configured connect timeout.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.closed.store(false, Ordering::SeqCst);
        let _guard = self.inner.reconnect_lock.lock().await;
        if self.inner.state() == ConnectionState::Connected {
            return Ok(());
        }
        connect_inner(&self.inner).await
    }

    /// Close the connection and suppress reconnection.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let link = self.inner.link.lock().await.take();
        if let Some(link) = link {
            link.dispose().await;
        }
        *self.inner.outbound.write().expect("outbound lock poisoned") = None;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Register a push handler for a command id and obtain its requester.
    /// The serde_json decoder for `T` is bound here.
    pub fn register<T, F>(&self, command_id: &str, callback: F) -> Requester
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.install(command_id, Some(decoding_callback(callback)), None);
        self.requester(command_id)
    }

    /// Like [`register`](Self::register), with a callback for unsolicited
    /// `ERROR` envelopes on the same command id.
    pub fn register_with_error_handler<T, F, E>(
        &self,
        command_id: &str,
        callback: F,
        on_error: E,
    ) -> Requester
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
        E: Fn(String) + Send + Sync + 'static,
    {
        self.install(
            command_id,
            Some(decoding_callback(callback)),
            Some(Arc::new(on_error)),
        );
        self.requester(command_id)
    }

    /// A requester with no inbound handler, for send-only command ids.
    pub fn requester(&self, command_id: &str) -> Requester {
        Requester {
            command_id: command_id.to_owned(),
            inner: self.inner.clone(),
        }
    }

    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner
            .on_connect
            .write()
            .expect("hook lock poisoned")
            .push(Arc::new(hook));
    }

    pub fn on_disconnect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner
            .on_disconnect
            .write()
            .expect("hook lock poisoned")
            .push(Arc::new(hook));
    }

    fn install(
        &self,
        command_id: &str,
        callback: Option<Arc<dyn Fn(Envelope) + Send + Sync>>,
        on_error: Option<Arc<dyn Fn(String) + Send + Sync>>,
    ) {
        if let Some(callback) = callback {
            let replaced = self
                .inner
                .handlers
                .write()
                .expect("handler lock poisoned")
                .insert(command_id.to_owned(), HandlerRow { callback, on_error });
            if replaced.is_some() {
                warn!(command_id = %command_id, "client handler overwritten");
            }
        }
    }
}

fn decoding_callback<T, F>(callback: F) -> Arc<dyn Fn(Envelope) + Send + Sync>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(move |envelope: Envelope| {
        match serde_json::from_slice::<T>(&envelope.data) {
            Ok(body) => callback(body),
            Err(e) => warn!(command_id = %envelope.id, error = %e, "push payload decode failed"),
        }
    })
}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Send handle bound to a command id.
///
/// Holds the engine, never a socket: sends made after a reconnect go to
/// the current link without re-registration.
#[derive(Clone)]
pub struct Requester {
    command_id: String,
    inner: Arc<ClientInner>,
}

impl Requester {
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// Fire-and-forget: a `REQUEST` envelope with no request id.  Any
    /// reply arrives through the handler registered for this command id.
    /// This is also the broadcast mode.
    pub async fn send<T: Serialize>(&self, body: &T) -> Result<(), ClientError> {
        let envelope = Envelope::request(self.command_id.clone(), serde_json::to_vec(body)?);
        self.inner.send_frame(encode(&envelope)?).await
    }

    /// Correlated request: mints a request id, parks a waiter, and
    /// returns the decoded `RESPONSE` body.  An `ERROR` reply becomes
    /// [`ClientError::Remote`]; no reply within the request timeout
    /// removes the waiter and fails with [`ClientError::Timeout`].
    pub async fn send_request<T, R>(&self, body: &T) -> Result<R, ClientError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let envelope = self.send_request_envelope(body).await?;
        match envelope.kind {
            FrameKind::Error => Err(ClientError::Remote(
                envelope.error_reason().unwrap_or_default(),
            )),
            _ => Ok(serde_json::from_slice(&envelope.data)?),
        }
    }

    /// Correlated request returning the raw reply envelope.
    pub async fn send_request_envelope<T: Serialize>(
        &self,
        body: &T,
    ) -> Result<Envelope, ClientError> {
        let request_id = new_request_id();
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(request_id.clone(), waiter_tx);

        let envelope = Envelope::request_with_id(
            self.command_id.clone(),
            request_id.clone(),
            serde_json::to_vec(body)?,
        );
        let frame = match encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                self.remove_pending(&request_id);
                return Err(e.into());
            }
        };
        if let Err(e) = self.inner.send_frame(frame).await {
            self.remove_pending(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.options.request_timeout, waiter_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Waiter dropped: the receive loop exited with the request
            // still pending.
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.remove_pending(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    fn remove_pending(&self, request_id: &str) {
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(request_id);
    }
}

// ---------------------------------------------------------------------------
// Connect / receive / reconnect
// ---------------------------------------------------------------------------

async fn open_link(options: &ClientOptions) -> Result<TransportLink, ClientError> {
    match &options.endpoint {
        Endpoint::Ws { url, headers } => crate::ws::connect(url, headers).await,
        Endpoint::Tcp { addr } => crate::tcp::connect(addr).await,
        Endpoint::Kcp { addr } => crate::kcp::connect(addr).await,
    }
}

async fn connect_inner(inner: &Arc<ClientInner>) -> Result<(), ClientError> {
    inner.set_state(ConnectionState::Connecting);

    // Dispose the previous socket and its tasks before a new one exists;
    // for KCP this is what keeps two tick loops off the same state.
    let previous = inner.link.lock().await.take();
    if let Some(previous) = previous {
        previous.dispose().await;
    }

    let link = match tokio::time::timeout(inner.options.connect_timeout, open_link(&inner.options))
        .await
    {
        Ok(Ok(link)) => link,
        Ok(Err(e)) => {
            inner.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        Err(_) => {
            inner.set_state(ConnectionState::Disconnected);
            return Err(ClientError::ConnectTimeout);
        }
    };

    *inner.outbound.write().expect("outbound lock poisoned") = Some(link.outbound.clone());
    let receive_task = tokio::spawn(receive_loop(inner.clone(), link.inbound));
    let mut tasks = link.tasks;
    tasks.push(receive_task);
    *inner.link.lock().await = Some(LinkHandle {
        shutdown: link.shutdown,
        tasks,
    });

    inner.set_state(ConnectionState::Connected);
    info!("connected");
    inner.fire(&inner.on_connect);
    Ok(())
}

async fn receive_loop(inner: Arc<ClientInner>, mut inbound: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = inbound.recv().await {
        let envelope = match decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable inbound frame dropped");
                continue;
            }
        };

        // Correlated reply: resolve the waiter and move on.
        if let Some(request_id) = &envelope.request_id {
            let waiter = inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(request_id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(envelope);
                continue;
            }
        }

        // Unsolicited push: hand to the registered handler off the read
        // path so user code cannot back-pressure the socket.
        let row = inner
            .handlers
            .read()
            .expect("handler lock poisoned")
            .get(&envelope.id)
            .cloned();
        match row {
            Some(row) => {
                tokio::spawn(async move {
                    if envelope.kind == FrameKind::Error {
                        let reason = envelope.error_reason().unwrap_or_default();
                        match &row.on_error {
                            Some(on_error) => on_error(reason),
                            None => {
                                warn!(command_id = %envelope.id, reason = %reason, "unsolicited error")
                            }
                        }
                    } else {
                        (row.callback)(envelope);
                    }
                });
            }
            None => {
                debug!(command_id = %envelope.id, "unsolicited push with no handler, dropped");
            }
        }
    }

    handle_disconnect(&inner).await;
}

async fn handle_disconnect(inner: &Arc<ClientInner>) {
    *inner.outbound.write().expect("outbound lock poisoned") = None;
    inner.set_state(ConnectionState::Disconnected);

    // Drop every parked waiter so callers blocked in send_request unblock
    // with a connection-lost error.
    let abandoned = {
        let mut pending = inner.pending.lock().expect("pending lock poisoned");
        let n = pending.len();
        pending.clear();
        n
    };
    if abandoned > 0 {
        debug!(abandoned, "pending requests failed on disconnect");
    }

    inner.fire(&inner.on_disconnect);

    if inner.options.auto_reconnect && !inner.closed.load(Ordering::SeqCst) {
        inner.set_state(ConnectionState::Reconnecting);
        tokio::spawn(reconnect_driver(inner.clone()));
    }
}

// Boxed rather than a plain `async fn`: `reconnect_driver` awaits
// `connect_inner`, which in turn spawns `receive_loop`, which on
// disconnect spawns `reconnect_driver` again. That cycle of opaque
// `async fn` return types defeats rustc's Send inference ("fetching
// the hidden types of an opaque inside of the defining scope is not
// supported"). Boxing gives this one a concrete return type, breaking
// the cycle without changing behavior.
fn reconnect_driver(inner: Arc<ClientInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut retry: u32 = 1;
        loop {
            let delay = backoff_delay(retry);
            debug!(retry, delay_secs = delay.as_secs(), "reconnect scheduled");
            tokio::time::sleep(delay).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            let guard = inner.reconnect_lock.lock().await;
            if inner.state() == ConnectionState::Connected {
                return;
            }
            match connect_inner(&inner).await {
                Ok(()) => {
                    info!(attempts = retry, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(retry, error = %e, "reconnect attempt failed");
                    drop(guard);
                    retry += 1;
                    if inner.options.max_retries > 0 && retry > inner.options.max_retries {
                        error!(
                            retries = inner.options.max_retries,
                            "reconnect abandoned, client stays disconnected"
                        );
                        inner.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    inner.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    })
}
