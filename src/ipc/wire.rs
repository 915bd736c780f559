//! Frames exchanged between the broker and worker processes.
//!
//! Each frame is a JSON document inside a length-delimited frame
//! (`LengthDelimitedCodec`, 4-byte big-endian length, 8 MiB max).
//!
//! ```text
//! child ──► Request { id, request }          broker ──► Response { id, outcome }
//!                                            broker ──► Shutdown      (pushed, no id)
//! ```
//!
//! Channel requests are answered out of order; `id` pairs a response with its
//! request. Lifecycle reports (`Ready`, `Failed`, `Shutdown`) are applied in the
//! order they were sent.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::warn;

use crate::commands::{CallEnvelope, CallId, ResultEnvelope};
use crate::error::{ChannelError, WorkerError};

pub(crate) type FrameReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
pub(crate) type FrameWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Frame {
    Request {
        id: u64,
        request: Request,
    },
    Response {
        id: u64,
        outcome: Result<Response, ChannelError>,
    },
    /// The process tree is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Request {
    Enqueue {
        channel: String,
        envelope: CallEnvelope,
    },
    Dequeue {
        channel: String,
        wait_ms: u64,
    },
    Publish {
        channel: String,
        result: ResultEnvelope,
    },
    WaitResult {
        channel: String,
        call_id: CallId,
        timeout_ms: Option<u64>,
    },
    PendingResults {
        channel: String,
    },
    /// The worker hosted by this process signalled readiness.
    Ready {
        worker: String,
        attempt: u32,
    },
    /// The worker hosted by this process finished with an error.
    Failed {
        worker: String,
        attempt: u32,
        error: WorkerError,
    },
    /// Relay of a local `ShutdownSignal::set()`.
    Shutdown,
}

impl Request {
    /// Reports about the hosted worker itself rather than a channel operation.
    pub(crate) fn is_lifecycle(&self) -> bool {
        matches!(self, Request::Ready { .. } | Request::Failed { .. } | Request::Shutdown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Response {
    Done,
    Envelope(Option<CallEnvelope>),
    Result(Option<ResultEnvelope>),
    Count(usize),
}

pub(crate) fn split(stream: UnixStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (
        FramedRead::new(read, LengthDelimitedCodec::new()),
        FramedWrite::new(write, LengthDelimitedCodec::new()),
    )
}

pub(crate) fn encode(frame: &Frame) -> Result<Bytes, ChannelError> {
    serde_json::to_vec(frame).map(Bytes::from).map_err(ChannelError::ipc)
}

pub(crate) fn decode(buf: &[u8]) -> Result<Frame, ChannelError> {
    serde_json::from_slice(buf).map_err(ChannelError::ipc)
}

/// Reads the next frame; `None` on a clean end of stream.
pub(crate) async fn read_frame(reader: &mut FrameReader) -> Option<Result<Frame, ChannelError>> {
    let buf = match reader.next().await? {
        Ok(buf) => buf,
        Err(e) => return Some(Err(e.into())),
    };
    Some(decode(&buf))
}

/// Drains `rx` into the socket until every sender is gone or the peer hangs up.
pub(crate) async fn write_frames(mut sink: FrameWriter, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let bytes = match encode(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(err) = sink.send(bytes).await {
            warn!(error = %err, "ipc write failed");
            break;
        }
    }
}
