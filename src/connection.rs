//! Client side of a worker connection: correlates replies with requests
//!
//! A background read loop owns the receive half of the channel and resolves
//! pending requests by correlation id. Each id resolves at most once; replies
//! for ids that are no longer pending (timed out, duplicated, or never sent)
//! are discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{FrameReceiver, FrameSender};
use crate::codec::Inbound;
use crate::error::TransportError;
use crate::protocol::{CallId, Frame};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// What the read loop delivers into a pending slot
#[derive(Debug)]
enum Reply {
    Frame(Frame),
    Malformed(String),
}

type PendingTable = Arc<Mutex<HashMap<CallId, oneshot::Sender<Reply>>>>;

/// Why a request produced no reply frame
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(TransportError),
}

/// Removes a pending slot when the request finishes, times out or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// A live, correlated connection to one worker
pub struct Connection {
    server: String,
    sender: tokio::sync::Mutex<FrameSender<BoxedWriter>>,
    pending: PendingTable,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Bind a connection to a reader/writer pair and start its read loop
    pub fn open<R, W>(server: impl Into<String>, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let server = server.into();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let receiver = FrameReceiver::new(Box::new(reader) as BoxedReader);
        let reader = tokio::spawn(Self::read_loop(
            server.clone(),
            receiver,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Arc::new(Self {
            server,
            sender: tokio::sync::Mutex::new(FrameSender::new(Box::new(writer) as BoxedWriter)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }

    async fn read_loop(
        server: String,
        mut receiver: FrameReceiver<BoxedReader>,
        pending: PendingTable,
        closed: Arc<AtomicBool>,
    ) {
        loop {
            match receiver.receive().await {
                Ok(Some(Inbound::Frame(frame))) if frame.is_reply() => {
                    Self::resolve(&server, &pending, frame.id(), Reply::Frame(frame));
                }
                Ok(Some(Inbound::Frame(frame))) => {
                    warn!(server = %server, kind = frame.kind(), "Ignoring request frame from worker");
                }
                Ok(Some(Inbound::Malformed { id: Some(id), reason })) => {
                    Self::resolve(&server, &pending, id, Reply::Malformed(reason));
                }
                Ok(Some(Inbound::Malformed { id: None, reason })) => {
                    warn!(server = %server, reason = %reason, "Skipping malformed frame");
                }
                Ok(None) => {
                    debug!(server = %server, "Worker closed its output");
                    break;
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Transport read failed");
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a closed slot
        let dropped = {
            let mut table = pending.lock();
            let count = table.len();
            table.clear();
            count
        };
        if dropped > 0 {
            debug!(server = %server, outstanding = dropped, "Failed outstanding requests on close");
        }
    }

    fn resolve(server: &str, pending: &PendingTable, id: CallId, reply: Reply) {
        let slot = pending.lock().remove(&id);
        match slot {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    trace!(server = %server, call_id = id, "Caller went away before reply");
                }
            }
            None => {
                debug!(server = %server, call_id = id, "Discarding reply with no pending request");
            }
        }
    }

    /// Name of the server on the other end
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Whether the worker side has closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn allocate_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request built from a fresh correlation id and await its reply
    pub async fn request<F>(&self, build: F, timeout: Duration) -> Result<Frame, RequestError>
    where
        F: FnOnce(CallId) -> Frame,
    {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if self.is_closed() {
            return Err(RequestError::Closed);
        }

        let frame = build(id);
        trace!(server = %self.server, call_id = id, kind = frame.kind(), "Sending request");
        // The deadline covers the write as well as the reply
        let exchange = async {
            {
                let mut sender = self.sender.lock().await;
                match sender.send(frame).await {
                    Ok(()) => {}
                    Err(TransportError::Io(e)) => {
                        debug!(server = %self.server, error = %e, "Write failed, treating as closed");
                        return Err(RequestError::Closed);
                    }
                    Err(e) => return Err(RequestError::Transport(e)),
                }
            }
            match rx.await {
                Ok(Reply::Frame(frame)) => Ok(frame),
                Ok(Reply::Malformed(reason)) => Err(RequestError::Malformed(reason)),
                Err(_) => Err(RequestError::Closed),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout(timeout)),
        }
    }

    /// Close the write half so the worker sees end of input
    pub async fn close_writer(&self) {
        if let Err(e) = self.sender.lock().await.close().await {
            debug!(server = %self.server, error = %e, "Error closing worker input");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
