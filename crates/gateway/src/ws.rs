//! WebSocket chat gateway client.
//!
//! One connection per outgoing user message: the client connects to
//! `ws(s)://<host>/ws/chat/<peer_id>`, sends a single JSON open frame with the
//! user text, then forwards every incoming text frame as a chunk until the
//! server closes the connection.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::{
    ChatRequest, ChatTransport, ConnectSnafu, EmptyMessageSnafu, EncodeFrameSnafu, GatewayError,
    GatewayEvent, GatewayEventPayload, GatewayResult, GatewayWorker, InvalidUrlSnafu, SendFrameSnafu,
    StreamHandle, StreamSessionId, TransportReply, make_event_stream,
};

#[derive(Serialize)]
struct OpenFrame<'a> {
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct WsChatGateway {
    base_url: String,
}

impl WsChatGateway {
    pub fn new(base_url: impl Into<String>) -> GatewayResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();

        ensure!(
            base_url.starts_with("ws://") || base_url.starts_with("wss://"),
            InvalidUrlSnafu {
                stage: "ws-gateway-new",
                url: base_url.clone(),
                details: "expected a ws:// or wss:// URL".to_string(),
            }
        );

        Ok(Self { base_url })
    }

    fn chat_url(&self, peer_id: &str) -> String {
        format!("{}/ws/chat/{peer_id}", self.base_url)
    }

    fn emit_error(
        event_tx: &mpsc::UnboundedSender<GatewayEvent>,
        session_id: StreamSessionId,
        error: GatewayError,
    ) {
        let _ = event_tx.send(GatewayEvent {
            session_id,
            payload: GatewayEventPayload::Error(error.to_string()),
        });
    }

    async fn run_stream_worker(
        url: String,
        message: String,
        session_id: StreamSessionId,
        event_tx: mpsc::UnboundedSender<GatewayEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut socket = match connect_async(&url).await.context(ConnectSnafu {
            stage: "ws-worker-connect",
        }) {
            Ok((socket, _response)) => socket,
            Err(error) => {
                tracing::error!(
                    session_id = session_id.0,
                    url = %url,
                    error = %error,
                    "failed to open chat gateway connection"
                );
                Self::emit_error(&event_tx, session_id, error);
                return;
            }
        };

        let open_frame = match serde_json::to_string(&OpenFrame { message: &message })
            .context(EncodeFrameSnafu {
                stage: "ws-worker-encode-open-frame",
            }) {
            Ok(payload) => payload,
            Err(error) => {
                Self::emit_error(&event_tx, session_id, error);
                return;
            }
        };

        if let Err(error) = socket
            .send(Message::Text(open_frame.into()))
            .await
            .context(SendFrameSnafu {
                stage: "ws-worker-send-open-frame",
            })
        {
            tracing::error!(
                session_id = session_id.0,
                error = %error,
                "failed to send chat open frame"
            );
            Self::emit_error(&event_tx, session_id, error);
            return;
        }

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Close the socket so the server stops generating promptly.
                    tracing::debug!(session_id = session_id.0, "chat gateway stream cancelled");
                    let _ = socket.close(None).await;
                    break;
                }
                next_frame = socket.next() => {
                    match next_frame {
                        Some(Ok(Message::Text(text))) => {
                            let event = GatewayEvent {
                                session_id,
                                payload: GatewayEventPayload::Chunk(text.to_string()),
                            };
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {
                            // Server contract is UTF-8 text frames; anything
                            // else (ping/pong/binary) is transport noise.
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                session_id = session_id.0,
                                error = %source,
                                "chat gateway connection closed uncleanly"
                            );
                            let error = GatewayError::Connect {
                                stage: "ws-worker-read-frame",
                                source,
                            };
                            Self::emit_error(&event_tx, session_id, error);
                            break;
                        }
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(GatewayEvent {
                session_id,
                payload: GatewayEventPayload::Done,
            });
        }
    }
}

impl ChatTransport for WsChatGateway {
    fn open_chat(&self, request: ChatRequest) -> GatewayResult<TransportReply> {
        ensure!(
            !request.message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "ws-gateway-open-chat",
                session_id: request.session_id,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.session_id);
        let worker: GatewayWorker = Box::pin(Self::run_stream_worker(
            self.chat_url(&request.peer_id),
            request.message,
            request.session_id,
            event_tx,
            cancel_rx,
        ));

        Ok(TransportReply::Chunked(StreamHandle { stream, worker }))
    }
}
