//! Sends typed prompts to the responses endpoint and records the reply.

use crate::api::{RelayApi, ResponseBody};
use crate::error::{RelayError, Result};
use crate::extract;
use crate::protocol::ResponsesRequest;
use crate::stream::{FrameDecoder, TextAccumulator};
use crate::transcript::{ChatMessage, DetachedTurn, Role, SharedConversation};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, instrument};

/// Shown in place of a reply when the request fails.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error processing your request.";

pub struct ChatSender {
    api: Arc<dyn RelayApi>,
    stream: bool,
}

impl ChatSender {
    pub fn new(api: Arc<dyn RelayApi>, stream: bool) -> Self {
        Self { api, stream }
    }

    /// Sends `prompt` and appends the user message and reply to `conversation`.
    ///
    /// Never fails: errors surface as the apology message. Returns the text
    /// recorded as the assistant reply.
    #[instrument(skip_all, fields(stream = self.stream))]
    pub async fn send(&self, prompt: &str, conversation: &SharedConversation) -> String {
        {
            let mut conversation = conversation.lock().await;
            conversation
                .transcript
                .push_completed_turn(Role::User, prompt);
            conversation.push_message(ChatMessage::new(Role::User, prompt));
        }

        let mut turn = DetachedTurn::new(Role::Assistant);
        let reply = match self.request(prompt, conversation, &mut turn).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Chat request failed");
                APOLOGY_MESSAGE.to_string()
            }
        };

        let mut conversation = conversation.lock().await;
        turn.complete(&mut conversation.transcript, &reply);
        conversation.push_message(ChatMessage::new(Role::Assistant, reply.clone()));
        reply
    }

    async fn request(
        &self,
        prompt: &str,
        conversation: &SharedConversation,
        turn: &mut DetachedTurn,
    ) -> Result<String> {
        let request = ResponsesRequest {
            prompt: prompt.to_string(),
            stream: self.stream,
        };
        let text = match self.api.responses(request).await? {
            ResponseBody::Json(value) => extract::envelope_text(&value).unwrap_or_default(),
            ResponseBody::Stream(mut body) => {
                let mut decoder = FrameDecoder::new();
                let mut accumulator = TextAccumulator::new();
                while let Some(chunk) = body.next().await {
                    for frame in decoder.push(&chunk?)? {
                        if let Some(fragment) = accumulator.ingest(&frame) {
                            turn.append(&mut conversation.lock().await.transcript, &fragment);
                        }
                    }
                    if decoder.is_finished() {
                        break;
                    }
                }
                if let Some(frame) = decoder.finish() {
                    accumulator.ingest(&frame);
                }
                accumulator.into_text()
            }
        };
        if text.trim().is_empty() {
            return Err(RelayError::EmptyResponse);
        }
        Ok(text)
    }
}
