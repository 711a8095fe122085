//! OpenAI Upstream Client
//!
//! The calls the service makes on the caller's behalf: minting realtime
//! session credentials and running Responses API requests. The API key never
//! leaves this module.

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::pin::Pin;
use tracing::{debug, instrument};
use voicedesk_core::protocol::search_tool_definitions;

use crate::config::Config;

pub type UpstreamStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("OpenAI request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OpenAI responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// The hosted tool a search request runs with.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTool {
    Web,
    Files { vector_store_id: String },
}

impl SearchTool {
    fn definition(&self) -> Value {
        match self {
            Self::Web => json!({ "type": "web_search_preview" }),
            Self::Files { vector_store_id } => json!({
                "type": "file_search",
                "vector_store_ids": [vector_store_id],
            }),
        }
    }
}

/// A Responses API reply.
pub enum UpstreamBody {
    Stream(UpstreamStream),
    Json(Value),
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    realtime_model: String,
    realtime_voice: String,
    responses_model: String,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            realtime_model: config.realtime_model.clone(),
            realtime_voice: config.realtime_voice.clone(),
            responses_model: config.responses_model.clone(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Creates a realtime session advertising the search tools and returns
    /// the upstream reply, ephemeral credential included.
    #[instrument(skip_all)]
    pub async fn create_realtime_session(&self, instructions: &str) -> Result<Value, UpstreamError> {
        let body = json!({
            "model": self.realtime_model,
            "voice": self.realtime_voice,
            "instructions": instructions,
            "input_audio_transcription": { "model": "whisper-1" },
            "tools": search_tool_definitions(),
            "tool_choice": "auto",
        });
        let response = self.send(self.post("/realtime/sessions").json(&body)).await?;
        debug!("Realtime session created");
        Ok(response.json().await?)
    }

    /// Runs `query` against the Responses API with a hosted search tool and
    /// returns the raw event stream.
    #[instrument(skip_all, fields(tool = ?tool))]
    pub async fn search(&self, tool: &SearchTool, query: &str) -> Result<UpstreamStream, UpstreamError> {
        let body = json!({
            "model": self.responses_model,
            "input": query,
            "tools": [tool.definition()],
            "stream": true,
        });
        let response = self.send(self.post("/responses").json(&body)).await?;
        Ok(Box::pin(response.bytes_stream()))
    }

    /// Sends a plain prompt to the Responses API.
    #[instrument(skip_all, fields(stream = stream))]
    pub async fn responses(&self, prompt: &str, stream: bool) -> Result<UpstreamBody, UpstreamError> {
        let body = json!({
            "model": self.responses_model,
            "input": prompt,
            "stream": stream,
        });
        let response = self.send(self.post("/responses").json(&body)).await?;
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if stream && is_event_stream {
            Ok(UpstreamBody::Stream(Box::pin(response.bytes_stream())))
        } else {
            Ok(UpstreamBody::Json(response.json().await?))
        }
    }
}
