use reclaim_gateway::StreamSessionId;
use reclaim_storage::ConversationId;

/// Send routing key used for stale-event rejection.
///
/// The session id changes on every submit, so events from a superseded send
/// can be discarded before they touch any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl SessionTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// Send lifecycle boundary for the chat screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending(SessionTarget),
    Streaming(SessionTarget),
    Finalizing(SessionTarget),
}

/// State transition input for the send lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTransition {
    Start(SessionTarget),
    StreamOpened(SessionTarget),
    BeginFinalize(SessionTarget),
    Complete(SessionTarget),
    Fail(SessionTarget),
    ResetToIdle,
}

/// Rejection reason for illegal send transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTransitionRejection {
    Busy {
        active: SessionTarget,
        attempted: SessionTarget,
    },
    NoActiveSend,
    SessionMismatch {
        active: SessionTarget,
        attempted: SessionTarget,
    },
}

pub type SendTransitionResult = Result<SendState, SendTransitionRejection>;

impl SendState {
    /// Returns the target of the in-flight send, if any.
    pub fn active_target(&self) -> Option<SessionTarget> {
        match self {
            Self::Idle => None,
            Self::Sending(target) | Self::Streaming(target) | Self::Finalizing(target) => {
                Some(*target)
            }
        }
    }

    /// Applies one transition deterministically.
    ///
    /// `Start` is only legal from `Idle`; callers supersede an active send by
    /// applying `ResetToIdle` first. Every other transition must match the
    /// currently active session exactly.
    pub fn apply(&self, transition: SendTransition) -> SendTransitionResult {
        match transition {
            SendTransition::Start(target) => self.apply_start(target),
            SendTransition::StreamOpened(target) => self.apply_stream_opened(target),
            SendTransition::BeginFinalize(target) => self.apply_begin_finalize(target),
            SendTransition::Complete(target) => self.apply_complete(target),
            SendTransition::Fail(target) => self.apply_fail(target),
            SendTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, target: SessionTarget) -> SendTransitionResult {
        match self.active_target() {
            None => Ok(Self::Sending(target)),
            Some(active) => Err(SendTransitionRejection::Busy {
                active,
                attempted: target,
            }),
        }
    }

    fn apply_stream_opened(&self, target: SessionTarget) -> SendTransitionResult {
        match self {
            Self::Sending(active) if *active == target => Ok(Self::Streaming(target)),
            Self::Sending(active) | Self::Streaming(active) | Self::Finalizing(active) => {
                Err(SendTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle => Err(SendTransitionRejection::NoActiveSend),
        }
    }

    fn apply_begin_finalize(&self, target: SessionTarget) -> SendTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(Self::Finalizing(target)),
            Self::Sending(active) | Self::Streaming(active) | Self::Finalizing(active) => {
                Err(SendTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle => Err(SendTransitionRejection::NoActiveSend),
        }
    }

    fn apply_complete(&self, target: SessionTarget) -> SendTransitionResult {
        match self {
            Self::Finalizing(active) if *active == target => Ok(Self::Idle),
            Self::Sending(active) | Self::Streaming(active) | Self::Finalizing(active) => {
                Err(SendTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle => Err(SendTransitionRejection::NoActiveSend),
        }
    }

    /// Failure returns to `Idle` from any active phase of the matching
    /// session; the caller surfaces the error text in the timeline.
    fn apply_fail(&self, target: SessionTarget) -> SendTransitionResult {
        match self.active_target() {
            Some(active) if active == target => Ok(Self::Idle),
            Some(active) => Err(SendTransitionRejection::SessionMismatch {
                active,
                attempted: target,
            }),
            None => Err(SendTransitionRejection::NoActiveSend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(session: u64) -> SessionTarget {
        SessionTarget::new(
            ConversationId::new_v7(),
            StreamSessionId::new(session),
        )
    }

    #[test]
    fn happy_path_walks_idle_to_idle() {
        let target = target(1);
        let mut state = SendState::Idle;

        for transition in [
            SendTransition::Start(target),
            SendTransition::StreamOpened(target),
            SendTransition::BeginFinalize(target),
            SendTransition::Complete(target),
        ] {
            state = state.apply(transition).unwrap();
        }

        assert_eq!(state, SendState::Idle);
    }

    #[test]
    fn start_is_rejected_while_a_send_is_active() {
        let first = target(1);
        let second = target(2);
        let state = SendState::Idle.apply(SendTransition::Start(first)).unwrap();

        assert_eq!(
            state.apply(SendTransition::Start(second)),
            Err(SendTransitionRejection::Busy {
                active: first,
                attempted: second,
            })
        );
    }

    #[test]
    fn stale_session_events_are_rejected() {
        let active = target(2);
        let stale = target(1);
        let state = SendState::Streaming(active);

        assert_eq!(
            state.apply(SendTransition::BeginFinalize(stale)),
            Err(SendTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
        assert_eq!(
            state.apply(SendTransition::Fail(stale)),
            Err(SendTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
    }

    #[test]
    fn terminal_transitions_need_an_active_send() {
        let target = target(1);

        assert_eq!(
            SendState::Idle.apply(SendTransition::Complete(target)),
            Err(SendTransitionRejection::NoActiveSend)
        );
        assert_eq!(
            SendState::Idle.apply(SendTransition::Fail(target)),
            Err(SendTransitionRejection::NoActiveSend)
        );
    }

    #[test]
    fn fail_returns_to_idle_from_any_active_phase() {
        let target = target(1);

        for state in [
            SendState::Sending(target),
            SendState::Streaming(target),
            SendState::Finalizing(target),
        ] {
            assert_eq!(state.apply(SendTransition::Fail(target)), Ok(SendState::Idle));
        }
    }

    #[test]
    fn reset_to_idle_is_always_legal() {
        let target = target(1);
        assert_eq!(
            SendState::Streaming(target).apply(SendTransition::ResetToIdle),
            Ok(SendState::Idle)
        );
    }
}
