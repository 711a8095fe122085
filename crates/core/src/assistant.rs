//! Assistant controller
//!
//! Owns the pieces of one voice assistant: saved preferences, the session
//! negotiator, the function-call bridge, the chat sender and the shared
//! conversation. A call is started with [`Assistant::start_call`], which hands
//! back an [`EventPump`] that drives the relay until the data channel closes.
//! Preference changes are written to the store before they take effect.

use crate::api::{HttpApi, RelayApi};
use crate::bridge::FunctionCallBridge;
use crate::chat::ChatSender;
use crate::config::ClientConfig;
use crate::error::{RelayError, Result};
use crate::prefs::{AssistantPrefs, PrefsStore, SharedPrefs};
use crate::relay::{EventRelay, RelayOutcome};
use crate::session::{DataChannel, Microphone, PeerFactory, Session, SessionNegotiator};
use crate::transcript::{Conversation, SharedConversation};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

pub struct Assistant {
    store: PrefsStore,
    prefs: SharedPrefs,
    negotiator: SessionNegotiator,
    bridge: Arc<FunctionCallBridge>,
    chat: ChatSender,
    conversation: SharedConversation,
    session: Option<Session>,
}

impl Assistant {
    /// Loads the saved preferences from `store`.
    pub fn new(
        store: PrefsStore,
        api: Arc<dyn RelayApi>,
        microphone: Arc<dyn Microphone>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let prefs: SharedPrefs = Arc::new(RwLock::new(store.load()));
        Self {
            bridge: Arc::new(FunctionCallBridge::new(api.clone(), prefs.clone())),
            chat: ChatSender::new(api.clone(), true),
            negotiator: SessionNegotiator::new(api, microphone, peers),
            conversation: Conversation::shared(),
            store,
            prefs,
            session: None,
        }
    }

    /// Builds an assistant over HTTP with the preferences saved at
    /// `config.prefs_path`.
    pub fn from_config(
        config: &ClientConfig,
        microphone: Arc<dyn Microphone>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        Self::new(
            PrefsStore::new(&config.prefs_path),
            Arc::new(HttpApi::new(config)),
            microphone,
            peers,
        )
    }

    pub async fn prefs(&self) -> AssistantPrefs {
        self.prefs.read().await.clone()
    }

    /// Used from the next call on.
    pub async fn set_instruction_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        let prompt = prompt.into();
        self.change_prefs(move |prefs| prefs.set_instruction_prompt(prompt))
            .await
    }

    /// Used by the next document search, including during a live call.
    pub async fn set_vector_store_id(&self, vector_store_id: Option<String>) -> Result<()> {
        self.change_prefs(move |prefs| prefs.vector_store_id = vector_store_id)
            .await
    }

    pub async fn set_wallpaper_index(&self, index: Option<u32>) -> Result<()> {
        self.change_prefs(move |prefs| prefs.wallpaper_index = index)
            .await
    }

    async fn change_prefs<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut AssistantPrefs),
    {
        let mut prefs = self.prefs.write().await;
        *prefs = self.store.update(change)?;
        debug!(path = %self.store.path().display(), "Preferences changed");
        Ok(())
    }

    pub fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    pub fn is_call_active(&self) -> bool {
        self.negotiator.is_call_active()
    }

    /// Sends a typed message. The reply, or an apology on failure, is recorded
    /// in the conversation next to any live call.
    pub async fn send_message(&self, prompt: &str) -> String {
        self.chat.send(prompt, &self.conversation).await
    }

    /// Opens a realtime session using the saved instruction prompt.
    pub async fn start_call(&mut self) -> Result<EventPump> {
        let instructions = self.prefs.read().await.instructions().to_string();
        let (session, inbound) = self.negotiator.start_call(&instructions).await?;
        let channel = session
            .channel()
            .ok_or_else(|| RelayError::Channel("session has no data channel".into()))?;
        self.session = Some(session);

        Ok(EventPump {
            inbound,
            channel,
            conversation: self.conversation.clone(),
            bridge: self.bridge.clone(),
            relay: EventRelay::new(),
        })
    }

    /// Tears the current call down. Does nothing when no call is up.
    pub fn end_call(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.end();
            info!("Call ended");
        }
    }
}

/// Feeds inbound data-channel messages through the relay.
pub struct EventPump {
    inbound: mpsc::Receiver<String>,
    channel: Arc<dyn DataChannel>,
    conversation: SharedConversation,
    bridge: Arc<FunctionCallBridge>,
    relay: EventRelay,
}

impl EventPump {
    /// Runs until the channel closes, then waits for any function calls still
    /// in flight. Returns the number of messages handled.
    #[instrument(name = "event_pump", skip_all)]
    pub async fn run(mut self) -> usize {
        let mut calls = JoinSet::new();
        let mut handled = 0;

        while let Some(message) = self.inbound.recv().await {
            handled += 1;
            let outcome = {
                let mut conversation = self.conversation.lock().await;
                self.relay.handle_message(&mut conversation, &message)
            };
            if let RelayOutcome::FunctionCall(call) = outcome {
                let bridge = self.bridge.clone();
                let conversation = self.conversation.clone();
                let channel = self.channel.clone();
                calls.spawn(async move {
                    bridge.execute(call, &conversation, channel.as_ref()).await
                });
            }
        }
        debug!(handled, "Data channel closed");

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Could not deliver function call output"),
                Err(e) => warn!(error = %e, "Function call task failed"),
            }
        }
        handled
    }
}
