//! Worker-process side of the IPC link.
//!
//! [`Client`] multiplexes concurrent requests over one connection: each call
//! gets an id and a oneshot waiting for the matching response. A `Shutdown`
//! push from the broker, or the connection ending, sets the local shutdown
//! signal. [`RemoteChannel`] implements [`SharedChannel`] on top of it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::{CallEnvelope, CallId, ResultEnvelope, SharedChannel};
use crate::error::ChannelError;
use crate::ipc::wire::{self, Frame, FrameReader, Request, Response};
use crate::shutdown::ShutdownSignal;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Response, ChannelError>>>>>;

/// Connection to the broker.
pub(crate) struct Client {
    out: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl Client {
    /// Connects to the broker at `path`; broker pushes drive `shutdown`.
    pub(crate) async fn connect(path: &Path, shutdown: ShutdownSignal) -> Result<Arc<Self>, ChannelError> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = wire::split(stream);
        let (out, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(wire::write_frames(writer, out_rx));

        let pending = Pending::default();
        let closed = CancellationToken::new();
        tokio::spawn(read_loop(reader, Arc::clone(&pending), shutdown, closed.clone()));

        Ok(Arc::new(Self {
            out,
            pending,
            next_id: AtomicU64::new(1),
            closed,
        }))
    }

    /// Sends `request` and waits for its response.
    pub(crate) async fn call(&self, request: Request) -> Result<Response, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        if self.closed.is_cancelled() || self.out.send(Frame::Request { id, request }).is_err() {
            self.pending.lock().remove(&id);
            return Err(ChannelError::Disconnected);
        }
        rx.await.unwrap_or(Err(ChannelError::Disconnected))
    }

    /// Sends `request` without waiting for the response.
    pub(crate) fn notify(&self, request: Request) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.out.send(Frame::Request { id, request });
    }
}

async fn read_loop(mut reader: FrameReader, pending: Pending, shutdown: ShutdownSignal, closed: CancellationToken) {
    while let Some(frame) = wire::read_frame(&mut reader).await {
        match frame {
            Ok(Frame::Response { id, outcome }) => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let _ = tx.send(outcome);
                }
            }
            Ok(Frame::Shutdown) => {
                if shutdown.set_local() {
                    debug!("shutdown received from broker");
                }
            }
            Ok(other) => warn!(frame = ?other, "unexpected frame from broker"),
            Err(err) => {
                warn!(error = %err, "ipc read failed");
                break;
            }
        }
    }

    closed.cancel();
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(ChannelError::Disconnected));
    }
    if shutdown.set_local() {
        warn!("broker connection lost, shutting down");
    }
}

/// [`SharedChannel`] proxy for a channel owned by the broker.
pub(crate) struct RemoteChannel {
    client: Arc<Client>,
    name: String,
}

impl RemoteChannel {
    pub(crate) fn new(client: Arc<Client>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

fn unexpected(response: Response) -> ChannelError {
    ChannelError::ipc(format!("unexpected response {response:?}"))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl SharedChannel for RemoteChannel {
    async fn enqueue(&self, envelope: CallEnvelope) -> Result<(), ChannelError> {
        let request = Request::Enqueue {
            channel: self.name.clone(),
            envelope,
        };
        match self.client.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Callers must not drop this future early: a command the broker already
    /// popped for this call would be lost.
    async fn dequeue(&self, wait: Duration) -> Result<Option<CallEnvelope>, ChannelError> {
        let request = Request::Dequeue {
            channel: self.name.clone(),
            wait_ms: millis(wait),
        };
        match self.client.call(request).await? {
            Response::Envelope(envelope) => Ok(envelope),
            other => Err(unexpected(other)),
        }
    }

    async fn publish(&self, result: ResultEnvelope) -> Result<(), ChannelError> {
        let request = Request::Publish {
            channel: self.name.clone(),
            result,
        };
        match self.client.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn wait_result(
        &self,
        call_id: CallId,
        timeout: Option<Duration>,
    ) -> Result<Option<ResultEnvelope>, ChannelError> {
        let request = Request::WaitResult {
            channel: self.name.clone(),
            call_id,
            timeout_ms: timeout.map(millis),
        };
        match self.client.call(request).await? {
            Response::Result(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    async fn pending_results(&self) -> Result<usize, ChannelError> {
        let request = Request::PendingResults {
            channel: self.name.clone(),
        };
        match self.client.call(request).await? {
            Response::Count(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }
}
