//! Length-prefixed TCP stream gateway.
//!
//! Wire format per frame: little-endian `u32` length, then exactly that
//! many envelope bytes.  A length of zero or above the frame ceiling is a
//! framing violation and closes the socket without a reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use tw_protocol::{MAX_FRAME_BYTES, TransportKind};

use crate::api::{GatewayError, ServerApi};
use crate::connections::OUTBOUND_QUEUE_DEPTH;
use crate::context::ConnectionContext;
use crate::dispatch::Dispatcher;

/// How long shutdown waits for in-flight connection workers.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum FrameReadError {
    #[error("length prefix {len} outside (0, {MAX_FRAME_BYTES}]")]
    LengthViolation { len: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Handle to the running TCP listener.
pub struct TcpGateway {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl TcpGateway {
    pub(crate) async fn start(api: Arc<ServerApi>) -> Result<TcpGateway, GatewayError> {
        let port = api.options().tcp_stream.port;
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "tcp gateway listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, api, shutdown_rx));

        Ok(TcpGateway {
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close existing connections, and wait (bounded)
    /// for their workers to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(1), self.accept_task)
            .await
            .is_err()
        {
            warn!("tcp accept task did not stop in time");
        }
        info!("tcp gateway stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    api: Arc<ServerApi>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            // Reap finished workers so the set does not grow with uptime.
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let max = api.options().tcp_stream.max_connections;
                        if max > 0 && api.connections().count(TransportKind::Tcp) >= max {
                            warn!(%peer, limit = max, "connection limit reached, refusing");
                            drop(stream);
                            continue;
                        }
                        workers.spawn(handle_connection(
                            stream,
                            peer,
                            api.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }
    }
    drop(listener);

    let drain = async {
        while workers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            remaining = workers.len(),
            "tcp connection workers outlived the grace period, aborting"
        );
        workers.shutdown().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    api: Arc<ServerApi>,
    mut gateway_shutdown: watch::Receiver<bool>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::with_capacity(api.options().tcp_stream.buffer_size, read_half);

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
    api.connections()
        .register(TransportKind::Tcp, &conn_id, out_tx.clone());
    let ctx = Arc::new(ConnectionContext::new(conn_id.clone(), TransportKind::Tcp).with_peer(peer));
    let dispatcher = Dispatcher::new(api.handlers().clone(), ctx, out_tx);
    let mut server_shutdown = api.shutdown_watch();

    let writer_task = tokio::spawn(write_loop(write_half, out_rx));
    info!(conn_id = %conn_id, %peer, "tcp connection open");

    loop {
        tokio::select! {
            biased;
            changed = gateway_shutdown.changed() => {
                if changed.is_err() || *gateway_shutdown.borrow() {
                    break;
                }
            }
            changed = server_shutdown.changed() => {
                if changed.is_err() || *server_shutdown.borrow() {
                    break;
                }
            }
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(bytes)) => dispatcher.dispatch(bytes),
                    Ok(None) => {
                        debug!(conn_id = %conn_id, "tcp peer closed");
                        break;
                    }
                    Err(FrameReadError::LengthViolation { len }) => {
                        warn!(conn_id = %conn_id, len, "length prefix violation, closing");
                        break;
                    }
                    Err(FrameReadError::Io(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "tcp read error");
                        break;
                    }
                }
            }
        }
    }

    writer_task.abort();
    api.connections().unregister(TransportKind::Tcp, &conn_id);
    info!(conn_id = %conn_id, "tcp connection closed");
}

/// Read one length-prefixed frame.  `Ok(None)` is a clean EOF at a frame
/// boundary; EOF mid-frame is an I/O error.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<Vec<u8>>, FrameReadError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(FrameReadError::LengthViolation { len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = out_rx.recv().await {
        let len = frame.len() as u32;
        if writer.write_all(&len.to_le_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(&frame).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
