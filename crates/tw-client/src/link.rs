//! The transport link: what every transport's `connect` hands back.
//!
//! A link is a pair of framed byte channels plus the tasks that bridge
//! them to the socket.  The engine owns exactly one live link at a time;
//! on reconnect the previous link's tasks are stopped and awaited before
//! the next link starts, so two tick/read loops never race on the same
//! socket state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) const LINK_QUEUE_DEPTH: usize = 64;

/// A connected transport, ready for the engine's receive loop.
pub(crate) struct TransportLink {
    /// Frames queued here are written to the socket by the link's writer.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Whole inbound frames; the channel closes when the socket does.
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Shared stop signal observed by every link task.
    pub shutdown: Arc<watch::Sender<bool>>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// What the engine retains of a link after wiring up the receive loop.
pub(crate) struct LinkHandle {
    pub shutdown: Arc<watch::Sender<bool>>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl LinkHandle {
    /// Stop the link tasks and wait for them; stragglers are aborted.
    pub(crate) async fn dispose(self) {
        let _ = self.shutdown.send(true);
        for mut task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                debug!("link task did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}
