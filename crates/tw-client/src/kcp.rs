//! KCP client transport.
//!
//! Mints a random conv id, binds an ephemeral UDP socket, and drives the
//! ARQ engine with its own 10 ms tick task.  The engine disposes the
//! previous link before connecting again, so a stale tick task never
//! races a fresh one on the same state.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kcp::Kcp;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::link::{LINK_QUEUE_DEPTH, TransportLink};

const TICK_PERIOD: Duration = Duration::from_millis(10);
const UDP_RECV_BUFFER: usize = 64 * 1024;

fn clock_ms(epoch: Instant) -> u32 {
    epoch.elapsed().as_millis() as u32
}

/// Output sink: one produced segment, one UDP datagram to the gateway.
struct UdpOutput {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl std::io::Write for UdpOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.socket.try_send_to(buf, self.peer) {
            Ok(n) => Ok(n),
            // Droppable; the ARQ layer retransmits.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(buf.len()),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) async fn connect(addr: &str) -> Result<TransportLink, ClientError> {
    let peer: SocketAddr = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| ClientError::Connect(format!("kcp resolve '{addr}': {e}")))?
        .next()
        .ok_or_else(|| ClientError::Connect(format!("kcp resolve '{addr}': no address")))?;

    let socket = Arc::new(
        UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ClientError::Connect(format!("kcp bind: {e}")))?,
    );
    socket
        .connect(peer)
        .await
        .map_err(|e| ClientError::Connect(format!("kcp connect '{addr}': {e}")))?;

    let conv: u32 = rand::random();
    let mut kcp = Kcp::new(conv, UdpOutput {
        socket: socket.clone(),
        peer,
    });
    kcp.set_nodelay(true, 10, 2, true);
    kcp.set_wndsize(256, 256);
    let kcp = Arc::new(Mutex::new(kcp));
    let epoch = Instant::now();

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let recv_task = tokio::spawn(recv_loop(
        socket,
        kcp.clone(),
        in_tx,
        shutdown_rx.clone(),
        epoch,
    ));
    let tick_task = tokio::spawn(tick_loop(
        kcp.clone(),
        shutdown_tx.clone(),
        shutdown_rx.clone(),
        epoch,
    ));
    let write_task = tokio::spawn(write_loop(kcp, out_rx, shutdown_rx));

    Ok(TransportLink {
        outbound: out_tx,
        inbound: in_rx,
        shutdown: shutdown_tx,
        tasks: vec![recv_task, tick_task, write_task],
    })
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    kcp: Arc<Mutex<Kcp<UdpOutput>>>,
    in_tx: mpsc::Sender<Vec<u8>>,
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
            recv = socket.recv(&mut buf) => {
                let n = match recv {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "udp receive error");
                        break;
                    }
                };
                let mut frames = Vec::new();
                {
                    let mut kcp = kcp.lock().expect("kcp state lock poisoned");
                    if let Err(e) = kcp.input(&buf[..n]) {
                        debug!(error = %e, "kcp input rejected");
                        continue;
                    }
                    let _ = kcp.update(clock_ms(epoch));
                    while let Ok(size) = kcp.peeksize() {
                        let mut message = vec![0u8; size];
                        match kcp.recv(&mut message) {
                            Ok(n) => {
                                message.truncate(n);
                                frames.push(message);
                            }
                            Err(_) => break,
                        }
                    }
                }
                for frame in frames {
                    if in_tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Drive the ARQ clock.  A dead link (too many retransmissions) stops
/// the whole transport so the engine can reconnect.
async fn tick_loop(
    kcp: Arc<Mutex<Kcp<UdpOutput>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
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
                let dead = {
                    let mut kcp = kcp.lock().expect("kcp state lock poisoned");
                    if let Err(e) = kcp.update(clock_ms(epoch)) {
                        warn!(error = %e, "kcp update error");
                    }
                    kcp.is_dead_link()
                };
                if dead {
                    warn!("kcp link is dead, stopping transport");
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    kcp: Arc<Mutex<Kcp<UdpOutput>>>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                let result = {
                    let mut kcp = kcp.lock().expect("kcp state lock poisoned");
                    kcp.send(&frame).and_then(|_| kcp.flush())
                };
                if let Err(e) = result {
                    warn!(error = %e, "kcp send failed, frame dropped");
                }
            }
        }
    }
}
