//! Raw TCP probe: hand-crafted frames for framing-violation suites.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct RawTcpProbe {
    stream: TcpStream,
}

impl RawTcpProbe {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        Ok(RawTcpProbe {
            stream: TcpStream::connect(addr).await?,
        })
    }

    /// Write a well-formed frame: LE u32 length prefix, then the bytes.
    pub async fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .await?;
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Write arbitrary bytes with no framing, for violation scenarios.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Read one frame, or `None` on EOF.
    pub async fn read_frame(&mut self) -> Option<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await.ok()?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.ok()?;
        Some(body)
    }

    /// True when the peer closes without sending anything, within
    /// `timeout`.  A reset counts: the peer may tear down with bytes of
    /// ours still unread.
    pub async fn expect_silent_close(&mut self, timeout: Duration) -> bool {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => true,
            Ok(Err(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
