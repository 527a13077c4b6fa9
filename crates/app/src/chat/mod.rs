pub mod screen;
pub mod state;
pub mod timeline;

pub use screen::{ChatScreen, ScreenEvent, ScreenEventPayload, Submitted};
pub use state::{
    SendState, SendTransition, SendTransitionRejection, SendTransitionResult, SessionTarget,
};
pub use timeline::{ChatMessage, MessageStatus, Timeline};
