//! Shared Application State
//!
//! Holds the configuration and the upstream client, created once at startup.

use crate::config::Config;
use crate::upstream::OpenAiClient;
use std::sync::Arc;

/// The shared application state, passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub openai: Arc<OpenAiClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let openai = OpenAiClient::new(reqwest::Client::new(), &config);
        Self {
            openai: Arc::new(openai),
            config: Arc::new(config),
        }
    }
}
