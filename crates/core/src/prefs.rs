//! Persisted Assistant Preferences
//!
//! The only durable state of the assistant: a cached instruction prompt, when
//! it was last changed, the vector store used for document search, and the
//! chosen wallpaper. Everything is optional and absent on first run.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Instructions used when no custom prompt has been cached.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Use the web_search tool for current events and the document_search tool for questions about the user's documents.";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AssistantPrefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallpaper_index: Option<u32>,
}

impl AssistantPrefs {
    /// The prompt to open a call with.
    pub fn instructions(&self) -> &str {
        self.instruction_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(DEFAULT_INSTRUCTIONS)
    }

    /// Caches a new prompt and stamps the update time.
    pub fn set_instruction_prompt(&mut self, prompt: impl Into<String>) {
        self.instruction_prompt = Some(prompt.into());
        self.prompt_updated_at = Some(Utc::now());
    }
}

/// The in-memory copy read by running components.
pub type SharedPrefs = Arc<RwLock<AssistantPrefs>>;

/// Loads and saves `AssistantPrefs` as a JSON file.
#[derive(Debug, Clone)]
pub struct PrefsStore {
    path: PathBuf,
}

impl PrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort load: a missing or unreadable file yields the defaults.
    pub fn load(&self) -> AssistantPrefs {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved preferences");
                return AssistantPrefs::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read preferences");
                return AssistantPrefs::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Ignoring corrupt preferences");
            AssistantPrefs::default()
        })
    }

    pub fn save(&self, prefs: &AssistantPrefs) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(prefs)?)?;
        debug!(path = %self.path.display(), "Saved preferences");
        Ok(())
    }

    /// Loads, applies `change`, and saves.
    pub fn update<F>(&self, change: F) -> Result<AssistantPrefs>
    where
        F: FnOnce(&mut AssistantPrefs),
    {
        let mut prefs = self.load();
        change(&mut prefs);
        self.save(&prefs)?;
        Ok(prefs)
    }
}
