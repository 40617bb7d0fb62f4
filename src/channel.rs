//! Transport channel: framed, duplex messaging over a pair of byte streams
//!
//! On the orchestrator side the streams are a worker's stdout/stdin, on the
//! worker side they are its own stdin/stdout. Tests use in-memory duplex pipes.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{FrameCodec, Inbound};
use crate::error::TransportError;
use crate::protocol::Frame;

/// Write half of a transport channel
pub struct FrameSender<W> {
    inner: FramedWrite<W, FrameCodec>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, FrameCodec::new()),
        }
    }

    /// Send one frame and flush it
    pub async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.inner.send(frame).await
    }

    /// Flush and close the underlying writer
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

/// Read half of a transport channel
pub struct FrameReceiver<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec::new()),
        }
    }

    /// Receive the next line, `None` once the peer has closed
    pub async fn receive(&mut self) -> Result<Option<Inbound>, TransportError> {
        self.inner.next().await.transpose()
    }
}

/// Both halves of a channel
pub struct TransportChannel<R, W> {
    sender: FrameSender<W>,
    receiver: FrameReceiver<R>,
}

impl<R, W> TransportChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            sender: FrameSender::new(writer),
            receiver: FrameReceiver::new(reader),
        }
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sender.send(frame).await
    }

    pub async fn receive(&mut self) -> Result<Option<Inbound>, TransportError> {
        self.receiver.receive().await
    }

    /// Split into independently owned halves
    pub fn split(self) -> (FrameSender<W>, FrameReceiver<R>) {
        (self.sender, self.receiver)
    }
}

/// Channel over an in-memory pipe
pub type MemoryChannel = TransportChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Create two connected in-memory channels
pub fn memory_pair(capacity: usize) -> (MemoryChannel, MemoryChannel) {
    let (a, b) = tokio::io::duplex(capacity);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    (
        TransportChannel::new(a_read, a_write),
        TransportChannel::new(b_read, b_write),
    )
}
