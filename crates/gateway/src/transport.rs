use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

/// Identifier for one streaming send session.
///
/// This must change on every submit so stale chunks from a superseded
/// connection can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// One outgoing chat request bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub session_id: StreamSessionId,
    pub peer_id: String,
    pub message: String,
}

impl ChatRequest {
    pub fn new(
        session_id: StreamSessionId,
        peer_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            peer_id: peer_id.into(),
            message: message.into(),
        }
    }
}

/// Data produced by an open gateway stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventPayload {
    /// One raw text fragment. May overlap or duplicate earlier fragments and
    /// may contain embedded control markers; cleaning is the consumer's job.
    Chunk(String),
    /// The server closed the connection cleanly.
    Done,
    /// The connection failed to open or closed uncleanly.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub session_id: StreamSessionId,
    pub payload: GatewayEventPayload,
}

pub type GatewayWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GatewayError {
    #[snafu(display("chat request for session {session_id:?} has an empty message"))]
    EmptyMessage {
        stage: &'static str,
        session_id: StreamSessionId,
    },
    #[snafu(display("invalid gateway URL '{url}': {details}"))]
    InvalidUrl {
        stage: &'static str,
        url: String,
        details: String,
    },
    #[snafu(display("failed to connect chat gateway at `{stage}`: {source}"))]
    Connect {
        stage: &'static str,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("failed to send frame to chat gateway at `{stage}`: {source}"))]
    SendFrame {
        stage: &'static str,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("failed to encode outgoing chat frame: {source}"))]
    EncodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
}

/// Reply shape for one chat request.
///
/// The gateway either streams fragments or hands back a complete message in
/// one piece; the tagged variant spares consumers any runtime shape
/// inspection.
pub enum TransportReply {
    Chunked(StreamHandle),
    Complete(String),
}

/// Live stream plus the worker future that feeds it. The caller decides where
/// the worker runs; dropping the stream cancels the worker.
pub struct StreamHandle {
    pub stream: GatewayEventStream,
    pub worker: GatewayWorker,
}

pub struct GatewayEventStream {
    session_id: StreamSessionId,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl GatewayEventStream {
    pub(crate) fn new(
        session_id: StreamSessionId,
        events: mpsc::UnboundedReceiver<GatewayEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            session_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn session_id(&self) -> StreamSessionId {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for GatewayEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Boundary between the chat screen and whatever carries assistant replies.
pub trait ChatTransport: Send + Sync {
    fn open_chat(&self, request: ChatRequest) -> GatewayResult<TransportReply>;
}

/// Builds the sender/stream/cancel trio every transport implementation (and
/// test double) wires a worker to.
pub fn make_event_stream(
    session_id: StreamSessionId,
) -> (
    mpsc::UnboundedSender<GatewayEvent>,
    GatewayEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        GatewayEventStream::new(session_id, event_rx, cancel_tx),
        cancel_rx,
    )
}
