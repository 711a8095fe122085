//! API Models
//!
//! Request and response bodies of the same-origin API, annotated for
//! OpenAPI documentation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct TokenPayload {
    #[serde(default)]
    #[schema(example = "You are a helpful assistant.")]
    pub instructions: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SearchPayload {
    #[schema(example = "weather in Lisbon")]
    pub query: String,
    /// Required by the document search.
    #[serde(default)]
    #[schema(example = "vs_abc123")]
    pub vector_store_id: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ResponsesPayload {
    #[schema(example = "Summarize today's news.")]
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
}

/// One `data:` frame of a search stream.
#[derive(Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchFrameSchema {
    Status { message: String },
    Content { content: String },
    Complete { content: Option<String> },
    Error { message: String },
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
