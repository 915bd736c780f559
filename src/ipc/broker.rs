//! # Broker: the orchestrator side of the IPC link.
//!
//! The broker owns every [`LocalChannel`] of the process tree and serves them
//! to worker processes over a Unix socket in a private temporary directory.
//!
//! ```text
//! serve(listener)
//!   loop { accept ─► spawn handle_connection }           until stop
//!
//! handle_connection(stream)
//!   reader: Request{id, ..} ─► spawn state.handle(request) ─► Response{id, ..} ─► writer queue
//!           Ready / Failed / Shutdown are handled inline, in arrival order
//!   shutdown watcher: parent signal set ─► Shutdown frame ─► writer queue
//!   peer gone: in-flight requests of this connection are cancelled
//! ```
//!
//! Worker startup travels the same link: a child reports `Ready` or `Failed`
//! for its `(worker, attempt)` and the broker fills the matching
//! [`StartupSlot`] the launching supervisor is watching.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{ChannelOptions, LocalChannel, SharedChannel};
use crate::error::{ChannelError, WorkerError};
use crate::ipc::wire::{self, Frame, Request, Response};
use crate::shutdown::ShutdownSignal;

/// Shared state behind the broker: channels and startup slots.
pub(crate) struct BrokerState {
    shutdown: ShutdownSignal,
    channels: Mutex<HashMap<String, Arc<LocalChannel>>>,
    startups: Mutex<HashMap<(String, u32), Arc<StartupSlot>>>,
}

/// Startup outcome of one `(worker, attempt)` hosted by a child process.
pub(crate) struct StartupSlot {
    ready: watch::Sender<bool>,
    error: Mutex<Option<WorkerError>>,
}

impl StartupSlot {
    fn new() -> Self {
        Self {
            ready: watch::Sender::new(false),
            error: Mutex::new(None),
        }
    }

    pub(crate) fn ready_receiver(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// The error the child reported, if any. Read once.
    pub(crate) fn take_error(&self) -> Option<WorkerError> {
        self.error.lock().take()
    }
}

impl BrokerState {
    pub(crate) fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            channels: Mutex::new(HashMap::new()),
            startups: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Returns the channel `name`, creating it with `options` on first use.
    pub(crate) fn channel(&self, name: &str, options: ChannelOptions) -> Arc<LocalChannel> {
        let mut channels = self.channels.lock();
        Arc::clone(
            channels
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(LocalChannel::new(name, options))),
        )
    }

    pub(crate) fn register_startup(&self, worker: &str, attempt: u32) -> Arc<StartupSlot> {
        let slot = Arc::new(StartupSlot::new());
        self.startups
            .lock()
            .insert((worker.to_owned(), attempt), Arc::clone(&slot));
        slot
    }

    pub(crate) fn release_startup(&self, worker: &str, attempt: u32) {
        self.startups.lock().remove(&(worker.to_owned(), attempt));
    }

    fn startup(&self, worker: &str, attempt: u32) -> Option<Arc<StartupSlot>> {
        let slot = self.startups.lock().get(&(worker.to_owned(), attempt)).cloned();
        if slot.is_none() {
            warn!(worker, attempt, "report for an unknown worker instance");
        }
        slot
    }

    /// Executes one request against the local state.
    pub(crate) async fn handle(&self, request: Request) -> Result<Response, ChannelError> {
        match request {
            Request::Enqueue { channel, envelope } => {
                self.channel(&channel, ChannelOptions::default())
                    .enqueue(envelope)
                    .await?;
                Ok(Response::Done)
            }
            Request::Dequeue { channel, wait_ms } => {
                let ch = self.channel(&channel, ChannelOptions::default());
                Ok(Response::Envelope(ch.dequeue(Duration::from_millis(wait_ms)).await?))
            }
            Request::Publish { channel, result } => {
                self.channel(&channel, ChannelOptions::default())
                    .publish(result)
                    .await?;
                Ok(Response::Done)
            }
            Request::WaitResult {
                channel,
                call_id,
                timeout_ms,
            } => {
                let ch = self.channel(&channel, ChannelOptions::default());
                let timeout = timeout_ms.map(Duration::from_millis);
                Ok(Response::Result(ch.wait_result(call_id, timeout).await?))
            }
            Request::PendingResults { channel } => {
                let ch = self.channel(&channel, ChannelOptions::default());
                Ok(Response::Count(ch.pending_results().await?))
            }
            Request::Ready { worker, attempt } => {
                if let Some(slot) = self.startup(&worker, attempt) {
                    slot.ready.send_replace(true);
                }
                Ok(Response::Done)
            }
            Request::Failed {
                worker,
                attempt,
                error,
            } => {
                if let Some(slot) = self.startup(&worker, attempt) {
                    *slot.error.lock() = Some(error);
                }
                Ok(Response::Done)
            }
            Request::Shutdown => {
                info!("shutdown requested by a worker process");
                self.shutdown.set();
                Ok(Response::Done)
            }
        }
    }
}

/// A bound broker. Dropping it stops accepting connections and removes the socket.
pub(crate) struct Broker {
    path: PathBuf,
    stop: CancellationToken,
    _dir: TempDir,
}

impl Broker {
    /// Binds a socket in a fresh temporary directory and starts serving `state`.
    pub(crate) fn bind(state: Arc<BrokerState>) -> Result<Self, ChannelError> {
        let dir = tempfile::Builder::new().prefix("procvisor-").tempdir()?;
        let path = dir.path().join("broker.sock");
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "broker listening");

        let stop = CancellationToken::new();
        tokio::spawn(serve(listener, state, stop.clone()));
        Ok(Self {
            path,
            stop,
            _dir: dir,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn serve(listener: UnixListener, state: Arc<BrokerState>, stop: CancellationToken) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!("broker stopped");
                break;
            }
            res = listener.accept() => match res {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state), stop.child_token()));
                }
                Err(e) => warn!(error = %e, "broker accept failed"),
            }
        }
    }
}

/// Serves one worker process until it hangs up or the broker stops.
pub(crate) async fn handle_connection(stream: UnixStream, state: Arc<BrokerState>, stop: CancellationToken) {
    debug!("worker connected");
    let (mut reader, writer) = wire::split(stream);
    let (out, out_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(wire::write_frames(writer, out_rx));

    let closed = stop.child_token();
    let watcher = {
        let out = out.clone();
        let shutdown = state.shutdown().clone();
        let closed = closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = out.send(Frame::Shutdown);
                }
                _ = closed.cancelled() => {}
            }
        })
    };

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = wire::read_frame(&mut reader) => frame,
        };
        match frame {
            Some(Ok(Frame::Request { id, request })) if request.is_lifecycle() => {
                let outcome = state.handle(request).await;
                let _ = out.send(Frame::Response { id, outcome });
            }
            Some(Ok(Frame::Request { id, request })) => {
                let state = Arc::clone(&state);
                let out = out.clone();
                let closed = closed.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        outcome = state.handle(request) => {
                            let _ = out.send(Frame::Response { id, outcome });
                        }
                        _ = closed.cancelled() => {}
                    }
                });
            }
            Some(Ok(other)) => warn!(frame = ?other, "unexpected frame from worker"),
            Some(Err(err)) => {
                warn!(error = %err, "ipc read failed");
                break;
            }
            None => break,
        }
    }

    closed.cancel();
    let _ = watcher.await;
    drop(out);
    let _ = writer_task.await;
    debug!("worker disconnected");
}
