//! voicedesk API Library Crate
//!
//! The same-origin service the voice client talks to. It holds the OpenAI key,
//! mints realtime credentials and relays searches and prompts to the
//! Responses API. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod search;
pub mod state;
pub mod upstream;
