//! Conversation State
//!
//! Holds the two views of a conversation: the running transcript shown while a
//! call is live, and the append-only chat history of completed messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The speaker of a message or transcript turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// The header printed in front of a turn in the rendered transcript.
    pub fn header(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A completed message in the chat history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// One entry of the running transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    /// A speaker's turn. `complete` flips once the final value has been folded in.
    Turn {
        role: Role,
        item_id: Option<String>,
        body: String,
        complete: bool,
        /// Set for turns owned by a [`DetachedTurn`].
        detached: Option<u64>,
    },
    /// A status line, such as speech detection or search progress.
    Marker(String),
    /// An error reported by the hosted session.
    Error(String),
}

/// The live transcript. At most one turn per role is open at a time.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_detached: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn open_turn_index(&self, role: Role) -> Option<usize> {
        self.entries.iter().rposition(|entry| {
            matches!(entry, TranscriptEntry::Turn { role: r, complete: false, detached: None, .. } if *r == role)
        })
    }

    fn detached_index(&self, key: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| matches!(entry, TranscriptEntry::Turn { detached: Some(k), .. } if *k == key))
    }

    /// Whether `role` currently has a turn receiving deltas.
    pub fn has_open_turn(&self, role: Role) -> bool {
        self.open_turn_index(role).is_some()
    }

    /// The text accumulated so far in the open turn for `role`.
    pub fn open_body(&self, role: Role) -> Option<&str> {
        match &self.entries[self.open_turn_index(role)?] {
            TranscriptEntry::Turn { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    /// Appends a fragment to the open turn for `role`, opening one if needed.
    pub fn append_delta(&mut self, role: Role, item_id: Option<&str>, fragment: &str) {
        match self.open_turn_index(role) {
            Some(idx) => {
                if let TranscriptEntry::Turn { body, .. } = &mut self.entries[idx] {
                    body.push_str(fragment);
                }
            }
            None => self.entries.push(TranscriptEntry::Turn {
                role,
                item_id: item_id.map(str::to_string),
                body: fragment.to_string(),
                complete: false,
                detached: None,
            }),
        }
    }

    /// Replaces the open turn for `role` with its final value.
    ///
    /// Creates a completed turn when no delta preceded the final value.
    pub fn complete_turn(&mut self, role: Role, item_id: Option<&str>, value: &str) {
        match self.open_turn_index(role) {
            Some(idx) => {
                if let TranscriptEntry::Turn {
                    body,
                    complete,
                    item_id: existing,
                    ..
                } = &mut self.entries[idx]
                {
                    *body = value.to_string();
                    *complete = true;
                    if existing.is_none() {
                        *existing = item_id.map(str::to_string);
                    }
                }
            }
            None => self.entries.push(TranscriptEntry::Turn {
                role,
                item_id: item_id.map(str::to_string),
                body: value.to_string(),
                complete: true,
                detached: None,
            }),
        }
    }

    /// Appends a finished turn without touching any open one.
    pub fn push_completed_turn(&mut self, role: Role, body: impl Into<String>) {
        self.entries.push(TranscriptEntry::Turn {
            role,
            item_id: None,
            body: body.into(),
            complete: true,
            detached: None,
        });
    }

    /// Whether a completed turn already exists for `item_id`.
    pub fn is_completed(&self, item_id: &str) -> bool {
        self.entries.iter().any(|entry| {
            matches!(entry, TranscriptEntry::Turn { item_id: Some(id), complete: true, .. } if id == item_id)
        })
    }

    pub fn push_marker(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry::Marker(text.into()));
    }

    pub fn push_error(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry::Error(text.into()));
    }

    /// Renders the transcript as the text shown to the user.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| match entry {
                TranscriptEntry::Turn { role, body, .. } => format!("{}: {}", role.header(), body),
                TranscriptEntry::Marker(text) => format!("[{}]", text),
                TranscriptEntry::Error(text) => format!("[error] {}", text),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A turn written by a single producer, such as a typed chat reply or a
/// search result, outside the live open turn of its role.
///
/// Realtime deltas never land in a detached turn, and a detached turn never
/// absorbs them. The entry is created on the first fragment.
#[derive(Debug)]
pub struct DetachedTurn {
    role: Role,
    key: Option<u64>,
}

impl DetachedTurn {
    pub fn new(role: Role) -> Self {
        Self { role, key: None }
    }

    pub fn append(&mut self, transcript: &mut Transcript, fragment: &str) {
        if let Some(idx) = self.key.and_then(|key| transcript.detached_index(key)) {
            if let TranscriptEntry::Turn { body, .. } = &mut transcript.entries[idx] {
                body.push_str(fragment);
            }
            return;
        }
        let key = transcript.next_detached;
        transcript.next_detached += 1;
        transcript.entries.push(TranscriptEntry::Turn {
            role: self.role,
            item_id: None,
            body: fragment.to_string(),
            complete: false,
            detached: Some(key),
        });
        self.key = Some(key);
    }

    /// Sets the final body, appending a completed turn if nothing streamed.
    pub fn complete(self, transcript: &mut Transcript, value: &str) {
        match self.key.and_then(|key| transcript.detached_index(key)) {
            Some(idx) => {
                if let TranscriptEntry::Turn { body, complete, .. } = &mut transcript.entries[idx] {
                    *body = value.to_string();
                    *complete = true;
                }
            }
            None => transcript.push_completed_turn(self.role, value),
        }
    }

    /// Removes whatever was streamed so far.
    pub fn discard(self, transcript: &mut Transcript) {
        if let Some(idx) = self.key.and_then(|key| transcript.detached_index(key)) {
            transcript.entries.remove(idx);
        }
    }
}

/// Transcript plus chat history for a single page session.
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    pub transcript: Transcript,
    history: Vec<ChatMessage>,
}

/// A conversation shared between the event loop and in-flight bridge calls.
pub type SharedConversation = Arc<Mutex<Conversation>>;

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedConversation {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.history.last()
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.history.push(message);
    }
}
