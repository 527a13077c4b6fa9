//! Chat screen coordinator.
//!
//! `ChatScreen` owns the timeline and send state; each submit spawns a driver
//! task that consumes the gateway stream through a [`StreamSession`] and
//! reports back over an event channel. All shared state is mutated only from
//! `pump_until_idle`, and every event carries its [`SessionTarget`] so data
//! from a superseded send is discarded before it can touch anything.

use std::sync::Arc;
use std::time::Duration;

use reclaim_core::StreamSession;
use reclaim_gateway::{
    ChatRequest, ChatTransport, GatewayEventPayload, StreamHandle, StreamSessionId,
    TransportReply,
};
use reclaim_storage::{
    ConversationId, MessageId, MessageRecord, SenderKind, Storage, unix_timestamp_seconds,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::state::{SendState, SendTransition, SessionTarget};
use super::timeline::{ChatMessage, MessageStatus, Timeline};

/// What the driver task reports back to the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEventPayload {
    StreamOpened,
    DisplayUpdated {
        content: String,
        scroll_to_bottom: bool,
    },
    Finalized {
        content: String,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenEvent {
    pub target: SessionTarget,
    pub payload: ScreenEventPayload,
}

/// Outcome of one submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Empty or whitespace-only input; nothing happened.
    Ignored,
    /// The transport refused the request; the error is already in the
    /// timeline.
    Rejected(String),
    /// A send is in flight under this target.
    Started(SessionTarget),
}

struct ActiveSend {
    target: SessionTarget,
    placeholder_id: MessageId,
    driver: JoinHandle<()>,
}

pub struct ChatScreen {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn ChatTransport>,
    conversation_id: ConversationId,
    user_id: String,
    peer_id: String,
    reveal_interval: Duration,
    timeline: Timeline,
    send_state: SendState,
    next_session_id: u64,
    active: Option<ActiveSend>,
    events_tx: mpsc::UnboundedSender<ScreenEvent>,
    events_rx: mpsc::UnboundedReceiver<ScreenEvent>,
    persist_tasks: Vec<JoinHandle<()>>,
}

impl ChatScreen {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn ChatTransport>,
        conversation_id: ConversationId,
        user_id: impl Into<String>,
        peer_id: impl Into<String>,
        reveal_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            transport,
            conversation_id,
            user_id: user_id.into(),
            peer_id: peer_id.into(),
            reveal_interval,
            timeline: Timeline::new(),
            send_state: SendState::Idle,
            next_session_id: 0,
            active: None,
            events_tx,
            events_rx,
            persist_tasks: Vec::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    /// Submits one user message.
    ///
    /// Blank input is ignored outright. A still-running send is forcibly
    /// superseded: its driver is aborted, which drops the gateway stream and
    /// cancels the connection, and nothing it produced afterwards is applied.
    pub fn submit(&mut self, text: &str) -> Submitted {
        let text = text.trim();
        if text.is_empty() {
            return Submitted::Ignored;
        }

        self.supersede_active();
        let target = self.next_target();
        self.transition(SendTransition::Start(target));

        let user_message_id = MessageId::new_v7();
        self.timeline
            .push(ChatMessage::user(user_message_id, text));
        self.persist(MessageRecord {
            id: user_message_id,
            conversation_id: self.conversation_id,
            sender: SenderKind::User,
            sender_id: self.user_id.clone(),
            receiver_id: self.peer_id.clone(),
            content: text.to_string(),
            created_at_unix_seconds: unix_timestamp_seconds(),
        });

        let placeholder_id = MessageId::new_v7();
        self.timeline
            .push(ChatMessage::assistant_placeholder(placeholder_id));

        let request = ChatRequest::new(target.session_id, self.peer_id.clone(), text);
        match self.transport.open_chat(request) {
            Ok(reply) => {
                let driver = tokio::spawn(run_driver(
                    target,
                    reply,
                    self.reveal_interval,
                    self.events_tx.clone(),
                ));
                self.active = Some(ActiveSend {
                    target,
                    placeholder_id,
                    driver,
                });
                Submitted::Started(target)
            }
            Err(error) => {
                tracing::warn!(
                    session_id = target.session_id.0,
                    error = %error,
                    "transport refused chat request"
                );
                self.fail_in_place(target, placeholder_id, &error.to_string());
                Submitted::Rejected(error.to_string())
            }
        }
    }

    /// Runs the screen's event loop until the active send finishes or fails.
    ///
    /// Returns immediately when nothing is in flight. Only events whose
    /// target matches the active send are applied.
    pub async fn pump_until_idle(&mut self) {
        self.pump_until_idle_with(|_| {}).await
    }

    pub async fn pump_until_idle_with<F>(&mut self, mut observe: F)
    where
        F: FnMut(&ScreenEventPayload),
    {
        loop {
            let Some((target, placeholder_id)) = self
                .active
                .as_ref()
                .map(|active| (active.target, active.placeholder_id))
            else {
                return;
            };

            let Some(event) = self.events_rx.recv().await else {
                return;
            };
            if event.target != target {
                tracing::debug!(
                    session_id = event.target.session_id.0,
                    active_session_id = target.session_id.0,
                    "discarding event from superseded session"
                );
                continue;
            }

            observe(&event.payload);
            match event.payload {
                ScreenEventPayload::StreamOpened => {
                    self.transition(SendTransition::StreamOpened(target));
                }
                ScreenEventPayload::DisplayUpdated { content, .. } => {
                    self.timeline.set_content(placeholder_id, &content);
                }
                ScreenEventPayload::Finalized { content } => {
                    self.transition(SendTransition::BeginFinalize(target));
                    self.timeline.set_content(placeholder_id, &content);
                    self.timeline.set_status(placeholder_id, MessageStatus::Done);
                    // Same id as the streaming placeholder, so the store
                    // keeps exactly one row per message.
                    self.persist(MessageRecord {
                        id: placeholder_id,
                        conversation_id: self.conversation_id,
                        sender: SenderKind::Ai,
                        sender_id: self.peer_id.clone(),
                        receiver_id: self.user_id.clone(),
                        content,
                        created_at_unix_seconds: unix_timestamp_seconds(),
                    });
                    self.transition(SendTransition::Complete(target));
                    self.active = None;
                    return;
                }
                ScreenEventPayload::Failed { message } => {
                    tracing::warn!(
                        session_id = target.session_id.0,
                        error = %message,
                        "send failed"
                    );
                    self.fail_in_place(target, placeholder_id, &message);
                    self.active = None;
                    return;
                }
            }
        }
    }

    /// Awaits every outstanding fire-and-forget store write. Used on
    /// shutdown and by tests that assert on persisted state.
    pub async fn flush_persistence(&mut self) {
        for task in self.persist_tasks.drain(..) {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "persistence task aborted");
            }
        }
    }

    fn next_target(&mut self) -> SessionTarget {
        self.next_session_id += 1;
        SessionTarget::new(
            self.conversation_id,
            StreamSessionId::new(self.next_session_id),
        )
    }

    fn supersede_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        tracing::debug!(
            session_id = active.target.session_id.0,
            "superseding in-flight send"
        );
        // Aborting the driver drops its gateway stream, which cancels the
        // connection worker.
        active.driver.abort();
        self.timeline
            .set_status(active.placeholder_id, MessageStatus::Cancelled);
        self.transition(SendTransition::ResetToIdle);
    }

    fn fail_in_place(&mut self, target: SessionTarget, placeholder_id: MessageId, message: &str) {
        self.timeline
            .set_content(placeholder_id, &format!("Something went wrong: {message}"));
        self.timeline.set_status(placeholder_id, MessageStatus::Error);
        self.transition(SendTransition::Fail(target));
    }

    fn transition(&mut self, transition: SendTransition) {
        match self.send_state.apply(transition) {
            Ok(next) => self.send_state = next,
            Err(rejection) => {
                tracing::error!(?rejection, "send transition rejected");
            }
        }
    }

    /// Store writes never block the screen and never surface to the user;
    /// failures are logged and the timeline stays authoritative.
    fn persist(&mut self, record: MessageRecord) {
        self.persist_tasks.retain(|task| !task.is_finished());
        let storage = Arc::clone(&self.storage);
        let task = tokio::task::spawn_blocking(move || {
            if let Err(error) = storage.upsert_message(record.conversation_id, record) {
                tracing::warn!(error = %error, "failed to persist message");
            }
        });
        self.persist_tasks.push(task);
    }
}

impl Drop for ChatScreen {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.driver.abort();
        }
    }
}

/// Consumes one transport reply and feeds the screen.
///
/// Chunks fold into the [`StreamSession`]; a reveal tick paces the typewriter.
/// On clean completion the remaining delta is drained at the same cadence
/// before the authoritative final content is reported.
async fn run_driver(
    target: SessionTarget,
    reply: TransportReply,
    reveal_interval: Duration,
    events_tx: mpsc::UnboundedSender<ScreenEvent>,
) {
    let send = |payload: ScreenEventPayload| {
        events_tx
            .send(ScreenEvent { target, payload })
            .is_ok()
    };

    if !send(ScreenEventPayload::StreamOpened) {
        return;
    }

    let mut session = StreamSession::new();
    let mut ticker = tokio::time::interval(reveal_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    match reply {
        TransportReply::Complete(text) => {
            session.push_chunk(&text);
        }
        TransportReply::Chunked(StreamHandle { mut stream, worker }) => {
            tokio::spawn(worker);

            loop {
                tokio::select! {
                    event = stream.recv() => match event.map(|event| event.payload) {
                        Some(GatewayEventPayload::Chunk(chunk)) => {
                            session.push_chunk(&chunk);
                        }
                        Some(GatewayEventPayload::Done) => break,
                        Some(GatewayEventPayload::Error(message)) => {
                            send(ScreenEventPayload::Failed { message });
                            return;
                        }
                        None => {
                            send(ScreenEventPayload::Failed {
                                message: "reply stream ended without closing".to_string(),
                            });
                            return;
                        }
                    },
                    _ = ticker.tick() => {
                        if let Some(displayed) = session.typewriter_mut().reveal_next() {
                            let content = displayed.to_string();
                            if !send(ScreenEventPayload::DisplayUpdated {
                                content,
                                scroll_to_bottom: true,
                            }) {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    // Drain the typewriter fully so the final write never races a stale
    // reveal.
    loop {
        ticker.tick().await;
        let Some(displayed) = session.typewriter_mut().reveal_next() else {
            break;
        };
        let content = displayed.to_string();
        if !send(ScreenEventPayload::DisplayUpdated {
            content,
            scroll_to_bottom: true,
        }) {
            return;
        }
    }

    send(ScreenEventPayload::Finalized {
        content: session.into_final_content(),
    });
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use reclaim_gateway::{GatewayError, GatewayEvent, GatewayResult, make_event_stream};
    use reclaim_storage::{ConversationStore, MemoryStorage, MessageStore};
    use tokio::sync::oneshot;

    use super::*;

    struct Script {
        payloads: Vec<GatewayEventPayload>,
        complete: Option<String>,
        stall_until_cancel: bool,
        cancelled_tx: Option<oneshot::Sender<()>>,
    }

    impl Script {
        fn chunked(frames: &[&str]) -> Self {
            let mut payloads: Vec<GatewayEventPayload> = frames
                .iter()
                .map(|frame| GatewayEventPayload::Chunk(frame.to_string()))
                .collect();
            payloads.push(GatewayEventPayload::Done);
            Self {
                payloads,
                complete: None,
                stall_until_cancel: false,
                cancelled_tx: None,
            }
        }

        fn stalling(frames: &[&str], cancelled_tx: oneshot::Sender<()>) -> Self {
            Self {
                payloads: frames
                    .iter()
                    .map(|frame| GatewayEventPayload::Chunk(frame.to_string()))
                    .collect(),
                complete: None,
                stall_until_cancel: true,
                cancelled_tx: Some(cancelled_tx),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                payloads: vec![GatewayEventPayload::Error(message.to_string())],
                complete: None,
                stall_until_cancel: false,
                cancelled_tx: None,
            }
        }

        fn complete(text: &str) -> Self {
            Self {
                payloads: Vec::new(),
                complete: Some(text.to_string()),
                stall_until_cancel: false,
                cancelled_tx: None,
            }
        }
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
            }
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn open_chat(&self, request: ChatRequest) -> GatewayResult<TransportReply> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected open_chat call");

            if let Some(text) = script.complete {
                return Ok(TransportReply::Complete(text));
            }

            let session_id = request.session_id;
            let (event_tx, stream, cancel_rx) = make_event_stream(session_id);
            let worker = Box::pin(async move {
                for payload in script.payloads {
                    let _ = event_tx.send(GatewayEvent {
                        session_id,
                        payload,
                    });
                }
                if script.stall_until_cancel {
                    let _ = cancel_rx.await;
                    if let Some(cancelled_tx) = script.cancelled_tx {
                        let _ = cancelled_tx.send(());
                    }
                }
            });

            Ok(TransportReply::Chunked(StreamHandle { stream, worker }))
        }
    }

    struct RefusingTransport;

    impl ChatTransport for RefusingTransport {
        fn open_chat(&self, request: ChatRequest) -> GatewayResult<TransportReply> {
            Err(GatewayError::EmptyMessage {
                stage: "test-refusal",
                session_id: request.session_id,
            })
        }
    }

    fn screen_with(transport: Arc<dyn ChatTransport>) -> (ChatScreen, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let conversation = storage
            .create_or_get_conversation("user-1", "companion")
            .unwrap();
        let screen = ChatScreen::new(
            storage.clone(),
            transport,
            conversation.id,
            "user-1",
            "companion",
            Duration::from_millis(15),
        );
        (screen, storage)
    }

    #[tokio::test(start_paused = true)]
    async fn streams_clean_reply_end_to_end() {
        let transport = Arc::new(ScriptedTransport::new(vec![Script::chunked(&[
            "He",
            "Hello ",
            "{\"type\": \"timeout\"}Hello there!",
        ])]));
        let (mut screen, storage) = screen_with(transport);

        let Submitted::Started(_) = screen.submit("hi") else {
            panic!("submit should start a send");
        };

        // The placeholder is visible before any network progress.
        assert_eq!(screen.timeline().len(), 2);
        assert_eq!(screen.timeline().last().unwrap().content, "");

        let mut displays = Vec::new();
        screen
            .pump_until_idle_with(|payload| {
                if let ScreenEventPayload::DisplayUpdated { content, .. } = payload {
                    displays.push(content.clone());
                }
            })
            .await;

        let reply = screen.timeline().last().unwrap();
        let reply_id = reply.id;
        assert_eq!(reply.content, "Hello there!");
        assert_eq!(reply.status, MessageStatus::Done);
        assert_eq!(screen.send_state(), SendState::Idle);

        // Reveal steps only ever show prefixes of the clean text, never a
        // control marker.
        for pair in displays.windows(2) {
            assert!(pair[1].starts_with(&pair[0]) || pair[1].len() >= pair[0].len());
        }
        assert!(displays.iter().all(|shown| !shown.contains("{\"type\"")));

        screen.flush_persistence().await;
        let conversation = storage
            .create_or_get_conversation("user-1", "companion")
            .unwrap();
        let stored = storage.list_messages(conversation.id, 0, 0).unwrap();
        assert_eq!(stored.len(), 2);
        let user_row = stored
            .iter()
            .find(|row| row.sender == SenderKind::User)
            .unwrap();
        assert_eq!(user_row.content, "hi");
        let reply_row = stored.iter().find(|row| row.id == reply_id).unwrap();
        assert_eq!(reply_row.content, "Hello there!");
    }

    #[tokio::test(start_paused = true)]
    async fn second_submit_supersedes_and_cancels_the_first() {
        let (cancelled_tx, cancelled_rx) = oneshot::channel();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Script::stalling(&["First reply never finishes"], cancelled_tx),
            Script::chunked(&["Second reply."]),
        ]));
        let (mut screen, _storage) = screen_with(transport);

        let Submitted::Started(first_target) = screen.submit("one") else {
            panic!("first submit should start");
        };
        let first_placeholder = screen.timeline().last().unwrap().id;

        // Let the first driver run and queue display events before it is
        // superseded.
        tokio::time::sleep(Duration::from_millis(90)).await;

        let Submitted::Started(second_target) = screen.submit("two") else {
            panic!("second submit should start");
        };
        assert_ne!(first_target.session_id, second_target.session_id);

        // The aborted driver dropped its stream, cancelling the first
        // connection.
        cancelled_rx.await.unwrap();

        screen.pump_until_idle().await;

        assert_eq!(screen.timeline().len(), 4);
        let first = screen.timeline().get(first_placeholder).unwrap();
        // Queued events from the superseded session were discarded, so the
        // cancelled placeholder was never mutated.
        assert_eq!(first.content, "");
        assert_eq!(first.status, MessageStatus::Cancelled);

        let second = screen.timeline().last().unwrap();
        assert_eq!(second.content, "Second reply.");
        assert_eq!(second.status, MessageStatus::Done);
        assert_eq!(screen.send_state(), SendState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_is_ignored() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (mut screen, _storage) = screen_with(transport);

        assert_eq!(screen.submit("   "), Submitted::Ignored);
        assert_eq!(screen.submit(""), Submitted::Ignored);
        assert!(screen.timeline().is_empty());
        assert_eq!(screen.send_state(), SendState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_surfaces_once_and_returns_to_idle() {
        let transport = Arc::new(ScriptedTransport::new(vec![Script::failing(
            "connection refused",
        )]));
        let (mut screen, _storage) = screen_with(transport);

        screen.submit("hi");
        screen.pump_until_idle().await;

        assert_eq!(screen.timeline().len(), 2);
        let reply = screen.timeline().last().unwrap();
        assert!(reply.content.contains("connection refused"));
        assert_eq!(reply.status, MessageStatus::Error);
        assert_eq!(screen.send_state(), SendState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_request_fails_in_place_without_a_driver() {
        let (mut screen, _storage) = screen_with(Arc::new(RefusingTransport));

        let Submitted::Rejected(_) = screen.submit("hi") else {
            panic!("refusal should reject the submit");
        };

        let reply = screen.timeline().last().unwrap();
        assert_eq!(reply.status, MessageStatus::Error);
        assert_eq!(screen.send_state(), SendState::Idle);

        // pump has nothing to wait on and returns immediately.
        screen.pump_until_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn complete_reply_is_animated_then_finalized() {
        let transport = Arc::new(ScriptedTransport::new(vec![Script::complete("All set.")]));
        let (mut screen, _storage) = screen_with(transport);

        screen.submit("hi");

        let mut displays = Vec::new();
        screen
            .pump_until_idle_with(|payload| {
                if let ScreenEventPayload::DisplayUpdated { content, .. } = payload {
                    displays.push(content.clone());
                }
            })
            .await;

        assert!(!displays.is_empty());
        assert_eq!(screen.timeline().last().unwrap().content, "All set.");
        assert_eq!(screen.send_state(), SendState::Idle);
    }
}
