//! Defines the JSON event vocabulary exchanged over the realtime data channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error details attached to an `error` event.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Events received from the hosted realtime session.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// Incremental transcription of the user's speech.
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    /// Final transcription of the user's speech.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        item_id: Option<String>,
        text: String,
    },
    /// The model finished streaming the arguments of a function call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },
    /// Any tag this client does not handle.
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct TagOnly {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl ServerEvent {
    /// Parses a raw data-channel message.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Reads only the `type` tag of a raw message, for logging.
    pub fn peek_tag(text: &str) -> Option<String> {
        serde_json::from_str::<TagOnly>(text).ok().and_then(|t| t.kind)
    }
}

/// A conversation item sent by the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// The result of a function call requested by the model.
    FunctionCallOutput { call_id: String, output: String },
}

/// Events sent to the hosted realtime session.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
}

impl ClientEvent {
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    pub fn response_create() -> Self {
        Self::ResponseCreate { response: None }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
