//! Function-call Bridge
//!
//! Runs the searches the hosted model asks for and hands the result back to
//! the realtime session. Every call is answered with exactly one
//! `function_call_output`, carrying an error payload when the search fails, so
//! the session is never left waiting.

use crate::api::RelayApi;
use crate::error::{RelayError, Result};
use crate::events::ClientEvent;
use crate::extract;
use crate::protocol::{SearchFrame, SearchKind, SearchRequest};
use crate::relay::FunctionCall;
use crate::session::DataChannel;
use crate::stream::{Frame, FrameDecoder, salvage_text};
use crate::prefs::SharedPrefs;
use crate::transcript::{ChatMessage, DetachedTurn, Role, SharedConversation};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Deserialize, Debug)]
struct SearchArguments {
    query: String,
}

pub struct FunctionCallBridge {
    api: Arc<dyn RelayApi>,
    prefs: SharedPrefs,
}

impl FunctionCallBridge {
    /// Document searches use the vector store set in `prefs` at the time of
    /// the call.
    pub fn new(api: Arc<dyn RelayApi>, prefs: SharedPrefs) -> Self {
        Self { api, prefs }
    }

    /// Runs `call` and reports its output on `channel`, followed by a request
    /// for the model's next turn.
    #[instrument(name = "function_call", skip_all, fields(call_id = %call.call_id, function = call.kind.function_name()))]
    pub async fn execute(
        &self,
        call: FunctionCall,
        conversation: &SharedConversation,
        channel: &dyn DataChannel,
    ) -> Result<()> {
        let output = match self.search(&call, conversation).await {
            Ok(result) => {
                info!(result_len = result.len(), "Search completed");
                json!({ "result": result })
            }
            Err(e) => {
                warn!(error = %e, "Search failed; returning error output");
                conversation
                    .lock()
                    .await
                    .transcript
                    .push_error(format!("{} failed: {}", call.kind.function_name(), e));
                json!({ "error": e.to_string() })
            }
        };

        channel
            .send(ClientEvent::function_call_output(&call.call_id, output.to_string()).to_json()?)
            .await?;
        channel
            .send(ClientEvent::response_create().to_json()?)
            .await?;
        Ok(())
    }

    async fn request_for(&self, kind: SearchKind, query: String) -> SearchRequest {
        match kind {
            SearchKind::Web => SearchRequest::web(query),
            SearchKind::Document => {
                let vector_store_id = self.prefs.read().await.vector_store_id.clone();
                SearchRequest::document(query, vector_store_id)
            }
        }
    }

    async fn search(&self, call: &FunctionCall, conversation: &SharedConversation) -> Result<String> {
        let args: SearchArguments = serde_json::from_str(&call.arguments)?;
        conversation
            .lock()
            .await
            .transcript
            .push_marker(format!("searching: {}", args.query));

        let request = self.request_for(call.kind, args.query).await;
        let mut result = SearchResult::new();
        let outcome = self.read_results(call.kind, request, &mut result, conversation).await;

        let mut conversation = conversation.lock().await;
        match outcome {
            Ok(()) if !result.text.is_empty() => {
                result.turn.complete(&mut conversation.transcript, &result.text);
                conversation.push_message(ChatMessage::new(Role::Assistant, result.text.clone()));
                Ok(result.text)
            }
            Ok(()) => {
                result.turn.discard(&mut conversation.transcript);
                Err(RelayError::EmptyResponse)
            }
            Err(e) => {
                result.turn.discard(&mut conversation.transcript);
                Err(e)
            }
        }
    }

    async fn read_results(
        &self,
        kind: SearchKind,
        request: SearchRequest,
        result: &mut SearchResult,
        conversation: &SharedConversation,
    ) -> Result<()> {
        let mut body = self.api.search(kind, request).await?;
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = body.next().await {
            for frame in decoder.push(&chunk?)? {
                result.apply(frame, conversation).await?;
            }
            if result.complete || decoder.is_finished() {
                break;
            }
        }
        if let Some(frame) = decoder.finish() {
            result.apply(frame, conversation).await?;
        }
        Ok(())
    }
}

/// Search text gathered so far, mirrored into its own transcript turn.
#[derive(Debug)]
struct SearchResult {
    text: String,
    turn: DetachedTurn,
    complete: bool,
}

impl SearchResult {
    fn new() -> Self {
        Self {
            text: String::new(),
            turn: DetachedTurn::new(Role::Assistant),
            complete: false,
        }
    }

    async fn push_text(&mut self, fragment: &str, conversation: &SharedConversation) {
        if fragment.is_empty() {
            return;
        }
        self.text.push_str(fragment);
        self.turn
            .append(&mut conversation.lock().await.transcript, fragment);
    }

    async fn apply(&mut self, frame: Frame, conversation: &SharedConversation) -> Result<()> {
        if self.complete {
            return Ok(());
        }
        match frame {
            Frame::Json(value) => match SearchFrame::from_value(&value) {
                Some(SearchFrame::Status { message }) => {
                    debug!(%message, "Search status");
                    conversation.lock().await.transcript.push_marker(message);
                }
                Some(SearchFrame::Content { content }) => {
                    self.push_text(&content, conversation).await
                }
                Some(SearchFrame::Complete { content }) => {
                    if self.text.is_empty() {
                        self.text = content.unwrap_or_default();
                    }
                    self.complete = true;
                }
                Some(SearchFrame::Error { message }) => return Err(RelayError::Search(message)),
                None => {
                    if let Some(text) = extract::delta_text(&value) {
                        self.push_text(&text, conversation).await;
                    }
                }
            },
            Frame::Malformed(raw) => match salvage_text(&raw) {
                Some(text) => self.push_text(&text, conversation).await,
                None => warn!("Skipping unreadable search frame"),
            },
            Frame::Done => self.complete = true,
        }
        Ok(())
    }
}
