//! Client core of the voicedesk assistant: realtime call negotiation, event
//! relay, streaming response decoding and the search function-call bridge.

pub mod api;
pub mod assistant;
pub mod bridge;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod prefs;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod stream;
pub mod transcript;

pub use assistant::{Assistant, EventPump};
pub use error::{RelayError, Result};
pub use transcript::{ChatMessage, Conversation, Role, SharedConversation};
