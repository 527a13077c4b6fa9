//! Transport layer for assistant replies.
//!
//! [`ChatTransport`] is the seam the chat screen talks to; [`WsChatGateway`]
//! is the production implementation over a WebSocket connection.

pub mod transport;
pub mod ws;

pub use transport::{
    ChatRequest, ChatTransport, GatewayError, GatewayEvent, GatewayEventPayload,
    GatewayEventStream, GatewayResult, GatewayWorker, StreamHandle, StreamSessionId,
    TransportReply, make_event_stream,
};
pub use ws::WsChatGateway;
