//! KCP gateway: reliable messaging over a single UDP socket.
//!
//! Sessions are demultiplexed by the conv id in the KCP header; a fresh
//! conv creates a connection record.  One reliable KCP message carries
//! one envelope.  The ARQ engine is externally clocked: a dedicated tick
//! task updates every session every 10 ms, and stalling it stalls the
//! transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kcp::{Kcp, get_conv};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tw_protocol::TransportKind;

use crate::api::{GatewayError, ServerApi};
use crate::connections::OUTBOUND_QUEUE_DEPTH;
use crate::context::ConnectionContext;
use crate::dispatch::Dispatcher;

const TICK_PERIOD: Duration = Duration::from_millis(10);
/// Sessions with no inbound datagram for this long are torn down.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const UDP_RECV_BUFFER: usize = 64 * 1024;

/// Millisecond clock for the ARQ engine, wrapping at u32 as it expects.
fn clock_ms(epoch: Instant) -> u32 {
    epoch.elapsed().as_millis() as u32
}

/// KCP output sink: each produced segment becomes one UDP datagram to
/// the session's peer.  A full socket buffer drops the datagram; the ARQ
/// layer retransmits on its own schedule.
struct UdpOutput {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl std::io::Write for UdpOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.socket.try_send_to(buf, self.peer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(buf.len()),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct KcpSession {
    conn_id: String,
    conv: u32,
    peer: SocketAddr,
    kcp: Mutex<Kcp<UdpOutput>>,
    dispatcher: Dispatcher,
    last_seen: Mutex<Instant>,
}

struct SessionEntry {
    session: Arc<KcpSession>,
    writer: JoinHandle<()>,
}

type SessionMap = Arc<Mutex<HashMap<u32, SessionEntry>>>;

/// Handle to the running KCP gateway.
pub struct KcpGateway {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
    sessions: SessionMap,
    api: Arc<ServerApi>,
}

impl KcpGateway {
    pub(crate) async fn start(api: Arc<ServerApi>) -> Result<KcpGateway, GatewayError> {
        let port = api.options().kcp.port;
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", port)).await?);
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "kcp gateway listening");

        let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let epoch = Instant::now();

        let recv_task = tokio::spawn(recv_loop(
            socket.clone(),
            api.clone(),
            sessions.clone(),
            shutdown_rx.clone(),
            epoch,
        ));
        let tick_task = tokio::spawn(tick_loop(
            api.clone(),
            sessions.clone(),
            shutdown_rx,
            epoch,
        ));

        Ok(KcpGateway {
            local_addr,
            shutdown_tx,
            recv_task,
            tick_task,
            sessions,
            api,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the receive and tick tasks and tear down every session.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in [self.recv_task, self.tick_task] {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("kcp gateway task did not stop in time");
            }
        }
        let drained: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().expect("kcp session map poisoned");
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.writer.abort();
            self.api
                .connections()
                .unregister(TransportKind::Kcp, &entry.session.conn_id);
        }
        info!("kcp gateway stopped");
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    api: Arc<ServerApi>,
    sessions: SessionMap,
    mut shutdown_rx: watch::Receiver<bool>,
    epoch: Instant,
) {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((n, peer)) => {
                        handle_datagram(&socket, &api, &sessions, &buf[..n], peer, epoch);
                    }
                    Err(e) => {
                        warn!(error = %e, "udp receive error");
                    }
                }
            }
        }
    }
}

fn handle_datagram(
    socket: &Arc<UdpSocket>,
    api: &Arc<ServerApi>,
    sessions: &SessionMap,
    datagram: &[u8],
    peer: SocketAddr,
    epoch: Instant,
) {
    if datagram.len() < 4 {
        debug!(%peer, len = datagram.len(), "runt datagram dropped");
        return;
    }
    let conv = get_conv(datagram);

    let session = {
        let map = sessions.lock().expect("kcp session map poisoned");
        map.get(&conv).map(|entry| entry.session.clone())
    };
    let session = match session {
        Some(session) => session,
        None => create_session(socket, api, sessions, conv, peer),
    };

    *session.last_seen.lock().expect("kcp session lock poisoned") = Instant::now();

    // Feed the ARQ engine and drain whole messages while holding the lock;
    // dispatch happens outside it.
    let mut frames = Vec::new();
    {
        let mut kcp = session.kcp.lock().expect("kcp state lock poisoned");
        if let Err(e) = kcp.input(datagram) {
            debug!(conv, error = %e, "kcp input rejected");
            return;
        }
        let _ = kcp.update(clock_ms(epoch));
        while let Ok(size) = kcp.peeksize() {
            let mut message = vec![0u8; size];
            match kcp.recv(&mut message) {
                Ok(n) => {
                    message.truncate(n);
                    frames.push(message);
                }
                Err(e) => {
                    debug!(conv, error = %e, "kcp recv error");
                    break;
                }
            }
        }
    }
    for frame in frames {
        session.dispatcher.dispatch(frame);
    }
}

fn create_session(
    socket: &Arc<UdpSocket>,
    api: &Arc<ServerApi>,
    sessions: &SessionMap,
    conv: u32,
    peer: SocketAddr,
) -> Arc<KcpSession> {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let output = UdpOutput {
        socket: socket.clone(),
        peer,
    };
    let mut kcp = Kcp::new(conv, output);
    kcp.set_nodelay(true, 10, 2, true);
    kcp.set_wndsize(256, 256);

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
    api.connections()
        .register(TransportKind::Kcp, &conn_id, out_tx.clone());
    let ctx = Arc::new(ConnectionContext::new(conn_id.clone(), TransportKind::Kcp).with_peer(peer));
    let dispatcher = Dispatcher::new(api.handlers().clone(), ctx, out_tx);

    let session = Arc::new(KcpSession {
        conn_id: conn_id.clone(),
        conv,
        peer,
        kcp: Mutex::new(kcp),
        dispatcher,
        last_seen: Mutex::new(Instant::now()),
    });
    let writer = tokio::spawn(session_writer(session.clone(), out_rx));
    sessions
        .lock()
        .expect("kcp session map poisoned")
        .insert(conv, SessionEntry {
            session: session.clone(),
            writer,
        });
    info!(conn_id = %conn_id, conv, %peer, "kcp session open");
    session
}

/// Drain the connection's outbound queue into the ARQ engine.
async fn session_writer(session: Arc<KcpSession>, mut out_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = out_rx.recv().await {
        let result = {
            let mut kcp = session.kcp.lock().expect("kcp state lock poisoned");
            kcp.send(&frame).and_then(|_| kcp.flush())
        };
        if let Err(e) = result {
            warn!(conn_id = %session.conn_id, error = %e, "kcp send failed, frame dropped");
        }
    }
}

async fn tick_loop(
    api: Arc<ServerApi>,
    sessions: SessionMap,
    mut shutdown_rx: watch::Receiver<bool>,
    epoch: Instant,
) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let now = clock_ms(epoch);
                let snapshot: Vec<Arc<KcpSession>> = {
                    let map = sessions.lock().expect("kcp session map poisoned");
                    map.values().map(|entry| entry.session.clone()).collect()
                };
                for session in snapshot {
                    let dead = {
                        let mut kcp = session.kcp.lock().expect("kcp state lock poisoned");
                        if let Err(e) = kcp.update(now) {
                            warn!(conv = session.conv, error = %e, "kcp update error");
                        }
                        kcp.is_dead_link()
                    };
                    let idle = session
                        .last_seen
                        .lock()
                        .expect("kcp session lock poisoned")
                        .elapsed()
                        > IDLE_TIMEOUT;
                    if dead || idle {
                        expire_session(&api, &sessions, session.conv, dead);
                    }
                }
            }
        }
    }
}

fn expire_session(api: &Arc<ServerApi>, sessions: &SessionMap, conv: u32, dead: bool) {
    let entry = sessions
        .lock()
        .expect("kcp session map poisoned")
        .remove(&conv);
    if let Some(entry) = entry {
        entry.writer.abort();
        api.connections()
            .unregister(TransportKind::Kcp, &entry.session.conn_id);
        info!(
            conn_id = %entry.session.conn_id,
            conv,
            peer = %entry.session.peer,
            dead_link = dead,
            "kcp session expired"
        );
    }
}
