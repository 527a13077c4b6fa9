//! Companion chat client: timeline, send lifecycle, and settings.
//!
//! The text pipeline lives in `reclaim-core`, transport in `reclaim-gateway`,
//! and persistence in `reclaim-storage`; this crate wires them into a working
//! chat screen.

pub mod chat;
pub mod settings;

pub use chat::{ChatScreen, ScreenEventPayload, SendState, SessionTarget, Submitted};
pub use settings::{GatewaySettings, SettingsStore};
