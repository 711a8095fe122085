//! Event Relay
//!
//! Applies inbound realtime events to the conversation. Dispatch is a single
//! exhaustive match over `ServerEvent`; unknown tags fall through to a
//! logged no-op.

use crate::events::ServerEvent;
use crate::protocol::SearchKind;
use crate::transcript::{ChatMessage, Conversation, Role};
use tracing::{debug, warn};

/// A function call the model wants the client to run.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub kind: SearchKind,
    pub call_id: String,
    /// The raw JSON argument string, parsed by the bridge.
    pub arguments: String,
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Nothing changed.
    Ignored,
    /// The transcript or history changed.
    Updated,
    /// The bridge must run this call.
    FunctionCall(FunctionCall),
}

#[derive(Debug, Default)]
pub struct EventRelay {
    user_speaking: bool,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_speaking(&self) -> bool {
        self.user_speaking
    }

    /// Parses and applies one raw data-channel message.
    pub fn handle_message(&mut self, conversation: &mut Conversation, raw: &str) -> RelayOutcome {
        match ServerEvent::parse(raw) {
            Ok(ServerEvent::Unknown) => {
                debug!(tag = ?ServerEvent::peek_tag(raw), "Ignoring unhandled event");
                RelayOutcome::Ignored
            }
            Ok(event) => self.apply(conversation, event),
            Err(e) => {
                warn!(error = %e, tag = ?ServerEvent::peek_tag(raw), "Dropping unreadable event");
                RelayOutcome::Ignored
            }
        }
    }

    pub fn apply(&mut self, conversation: &mut Conversation, event: ServerEvent) -> RelayOutcome {
        match event {
            ServerEvent::SpeechStarted => {
                self.user_speaking = true;
                conversation.transcript.push_marker("speech started");
                RelayOutcome::Updated
            }
            ServerEvent::SpeechStopped => {
                self.user_speaking = false;
                conversation.transcript.push_marker("speech stopped");
                RelayOutcome::Updated
            }
            ServerEvent::InputTranscriptDelta { item_id, delta } => {
                append(conversation, Role::User, item_id, &delta)
            }
            ServerEvent::AudioTranscriptDelta { item_id, delta }
            | ServerEvent::TextDelta { item_id, delta } => {
                append(conversation, Role::Assistant, item_id, &delta)
            }
            ServerEvent::InputTranscriptCompleted {
                item_id,
                transcript,
            } => finish(conversation, Role::User, item_id, transcript),
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript,
            } => finish(conversation, Role::Assistant, item_id, transcript),
            ServerEvent::TextDone { item_id, text } => {
                finish(conversation, Role::Assistant, item_id, text)
            }
            ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            } => match SearchKind::from_function_name(&name) {
                Some(kind) => {
                    debug!(%name, %call_id, "Model requested a function call");
                    RelayOutcome::FunctionCall(FunctionCall {
                        kind,
                        call_id,
                        arguments,
                    })
                }
                None => {
                    debug!(%name, %call_id, "Ignoring call to unknown function");
                    RelayOutcome::Ignored
                }
            },
            ServerEvent::Error { error } => {
                warn!(message = %error.message, code = ?error.code, "Realtime session reported an error");
                conversation.transcript.push_error(error.message);
                RelayOutcome::Updated
            }
            ServerEvent::Unknown => RelayOutcome::Ignored,
        }
    }
}

fn append(
    conversation: &mut Conversation,
    role: Role,
    item_id: Option<String>,
    delta: &str,
) -> RelayOutcome {
    if delta.is_empty() {
        return RelayOutcome::Ignored;
    }
    conversation
        .transcript
        .append_delta(role, item_id.as_deref(), delta);
    RelayOutcome::Updated
}

/// Folds the final value of a turn into the transcript and records it once.
fn finish(
    conversation: &mut Conversation,
    role: Role,
    item_id: Option<String>,
    value: String,
) -> RelayOutcome {
    let repeated = match item_id.as_deref() {
        Some(id) => conversation.transcript.is_completed(id),
        None => {
            !conversation.transcript.has_open_turn(role)
                && conversation
                    .last_message()
                    .is_some_and(|last| last.role == role && last.content == value)
        }
    };
    if repeated {
        debug!(%role, ?item_id, "Ignoring repeated completion");
        return RelayOutcome::Ignored;
    }

    let transcript = &mut conversation.transcript;
    let value = if value.is_empty() {
        transcript.open_body(role).unwrap_or_default().to_string()
    } else {
        value
    };
    if value.is_empty() && !transcript.has_open_turn(role) {
        return RelayOutcome::Ignored;
    }

    transcript.complete_turn(role, item_id.as_deref(), &value);
    if !value.is_empty() {
        conversation.push_message(ChatMessage::new(role, value));
    }
    RelayOutcome::Updated
}
