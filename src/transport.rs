//! Messaging substrate adapter (C1).
//!
//! Grounded on `opensase-core/crates/sase-sdwan/src/edge/integration.rs`'s
//! use of `tokio::sync::mpsc` as the entire transport between tasks,
//! generalised here into a trait boundary so the broker can be driven by
//! any duplex, multi-frame-capable channel.
//! The concrete [`InProcessTransport`] is the reference adapter used by
//! tests and by the master↔broker channel; a real deployment would swap in
//! a networked dealer/sub transport behind the same trait.

use crate::error::{BgpviewError, Result};
use crate::protocol::Frame;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single logical message: an ordered sequence of frames, the last one
/// implicitly marked by the absence of a `SEND_MORE` continuation — the
/// transport never splits or merges messages across frame boundaries.
pub type Message = Vec<Frame>;

/// Duplex, multi-frame message channel. Implementors provide the "dealer"
/// half of the broker's connection to the server.
#[async_trait]
pub trait DealerChannel: Send {
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Non-blocking receive: `Ok(None)` means `WOULD_BLOCK`.
    fn try_recv(&mut self) -> Result<Option<Message>>;

    /// Blocks until a message is available or the channel closes.
    async fn recv(&mut self) -> Result<Option<Message>>;
}

/// Read-only subscription channel (the "sub" half). Filtering by byte
/// prefix happens at the publisher; this side only receives what it's
/// already subscribed to.
#[async_trait]
pub trait SubChannel: Send {
    async fn recv(&mut self) -> Result<Option<Message>>;
}

/// In-process duplex channel pair backed by `tokio::sync::mpsc`. Each side
/// is a plain queue of [`Message`]s; there is no framing overhead because
/// frame boundaries are preserved structurally by `Vec<Frame>`.
pub struct InProcessDealer {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl InProcessDealer {
    /// Build a connected pair: `(client_side, server_side)`.
    pub fn pair(buffer: usize) -> (InProcessDealer, InProcessDealer) {
        let (tx_a, rx_b) = mpsc::channel(buffer);
        let (tx_b, rx_a) = mpsc::channel(buffer);
        (
            InProcessDealer { tx: tx_a, rx: rx_a },
            InProcessDealer { tx: tx_b, rx: rx_b },
        )
    }
}

#[async_trait]
impl DealerChannel for InProcessDealer {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BgpviewError::Transport("dealer peer dropped".into()))
    }

    fn try_recv(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }
}

/// In-process sub channel backed by a broadcast-like single-producer queue.
/// The reference adapter does not implement byte-prefix filtering itself —
/// that happens once, at encode time, via [`crate::protocol::encode_sub_prefix`]
/// — this channel simply relays whatever the publisher sends.
pub struct InProcessSub {
    rx: mpsc::Receiver<Message>,
}

pub struct InProcessSubPublisher {
    tx: mpsc::Sender<Message>,
}

impl InProcessSubPublisher {
    pub fn pair(buffer: usize) -> (InProcessSubPublisher, InProcessSub) {
        let (tx, rx) = mpsc::channel(buffer);
        (InProcessSubPublisher { tx }, InProcessSub { rx })
    }

    pub async fn publish(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BgpviewError::Transport("sub subscriber dropped".into()))
    }
}

#[async_trait]
impl SubChannel for InProcessSub {
    async fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }
}
