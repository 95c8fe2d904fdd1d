//! Length-prefixed TCP client transport.
//!
//! Same framing as the server gateway: little-endian `u32` length then
//! envelope bytes, length in `(0, MAX_FRAME_BYTES]`.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    TcpStream,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use tw_protocol::MAX_FRAME_BYTES;

use crate::error::ClientError;
use crate::link::{LINK_QUEUE_DEPTH, TransportLink};

pub(crate) async fn connect(addr: &str) -> Result<TransportLink, ClientError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ClientError::Connect(format!("tcp connect '{addr}': {e}")))?;
    let (read_half, write_half) = stream.into_split();

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(LINK_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let reader_task = tokio::spawn(read_loop(read_half, in_tx, shutdown_rx.clone()));
    let writer_task = tokio::spawn(write_loop(write_half, out_rx, shutdown_rx));

    Ok(TransportLink {
        outbound: out_tx,
        inbound: in_rx,
        shutdown: shutdown_tx,
        tasks: vec![reader_task, writer_task],
    })
}

async fn read_loop(
    read_half: OwnedReadHalf,
    in_tx: mpsc::Sender<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(bytes)) => {
                        if in_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("tcp server closed");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "tcp read error");
                        break;
                    }
                }
            }
        }
    }
}

async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<Option<Vec<u8>>, std::io::Error> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("length prefix {len} outside (0, {MAX_FRAME_BYTES}]"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
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
        }
    }
    let _ = writer.shutdown().await;
}
