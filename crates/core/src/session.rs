//! Session Negotiator
//!
//! Establishes a peer-to-peer audio and data session with the hosted realtime
//! API: credential, microphone, peer connection, SDP offer/answer. The media
//! and peer primitives are supplied by the platform through the traits below.
//!
//! Failures are terminal for the attempt. Whatever was set up is torn down,
//! the call-active flag is cleared, and the caller may start again.

use crate::api::RelayApi;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Label of the data channel carrying JSON events.
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// A local audio track handed to the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: String,
}

/// A captured microphone stream.
pub trait MediaStream: Send + Sync {
    fn audio_tracks(&self) -> Vec<AudioTrack>;
    /// Stops every track, releasing the device.
    fn stop_all(&self);
}

/// Grants access to the microphone.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MediaStream>>;
}

/// Plays the remote audio track.
pub trait AudioSink: Send + Sync {
    fn detach(&self);
}

/// The outbound half of an open data channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;
    fn close(&self);
}

/// An open data channel and the receiver of its inbound messages.
pub struct ChannelPair {
    pub channel: Arc<dyn DataChannel>,
    pub inbound: mpsc::Receiver<String>,
}

/// A peer connection to the hosted API.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_audio_track(&self, track: &AudioTrack) -> Result<()>;
    /// Routes the remote audio track to a sink owned by the platform.
    fn attach_remote_audio(&self) -> Result<Box<dyn AudioSink>>;
    async fn create_data_channel(&self, label: &str) -> Result<ChannelPair>;
    async fn create_offer(&self) -> Result<String>;
    async fn set_local_description(&self, sdp: &str) -> Result<()>;
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;
    fn close(&self);
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PeerConnection>>;
}

/// Guards against more than one call at a time.
#[derive(Debug, Default, Clone)]
pub struct CallFlag(Arc<AtomicBool>);

impl CallFlag {
    /// Sets the flag, failing if it was already set.
    pub fn try_begin(&self) -> Result<()> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RelayError::CallAlreadyActive)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One live call. Every handle is optional so a half-built session can be
/// torn down the same way as a complete one.
pub struct Session {
    credential: Option<SecretString>,
    peer: Option<Box<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
    media: Option<Box<dyn MediaStream>>,
    sink: Option<Box<dyn AudioSink>>,
    ready: bool,
    flag: Option<CallFlag>,
}

impl Session {
    fn new(flag: CallFlag) -> Self {
        Self {
            credential: None,
            peer: None,
            channel: None,
            media: None,
            sink: None,
            ready: false,
            flag: Some(flag),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// The outbound data channel, while the session is up.
    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.clone()
    }

    /// Releases everything, in a fixed order: data channel, local tracks,
    /// peer connection, audio sink. Safe to call more than once.
    pub fn end(&mut self) {
        self.ready = false;
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        if let Some(sink) = self.sink.take() {
            sink.detach();
        }
        self.credential = None;
        if let Some(flag) = self.flag.take() {
            flag.clear();
            debug!("Session resources released");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

/// Opens realtime sessions.
pub struct SessionNegotiator {
    api: Arc<dyn RelayApi>,
    microphone: Arc<dyn Microphone>,
    peers: Arc<dyn PeerFactory>,
    flag: CallFlag,
}

impl SessionNegotiator {
    pub fn new(
        api: Arc<dyn RelayApi>,
        microphone: Arc<dyn Microphone>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        Self {
            api,
            microphone,
            peers,
            flag: CallFlag::default(),
        }
    }

    pub fn is_call_active(&self) -> bool {
        self.flag.is_active()
    }

    /// Starts a call with the given instructions.
    ///
    /// Returns the ready session and the receiver of inbound event messages.
    #[instrument(name = "start_call", skip_all)]
    pub async fn start_call(&self, instructions: &str) -> Result<(Session, mpsc::Receiver<String>)> {
        self.flag.try_begin()?;
        let mut session = Session::new(self.flag.clone());

        match self.establish(&mut session, instructions).await {
            Ok(inbound) => {
                session.ready = true;
                info!("Realtime session established");
                Ok((session, inbound))
            }
            Err(e) => {
                error!(error = %e, "Call start failed");
                session.end();
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        session: &mut Session,
        instructions: &str,
    ) -> Result<mpsc::Receiver<String>> {
        let credential = self.api.fetch_token(instructions.to_string()).await?;
        session.credential = Some(credential);
        debug!("Ephemeral credential acquired");

        let media = self.microphone.open().await?;
        let tracks = media.audio_tracks();
        session.media = Some(media);
        if tracks.is_empty() {
            warn!("Microphone stream has no audio tracks");
        }

        let peer = session.peer.insert(self.peers.create().await?);
        for track in &tracks {
            peer.add_audio_track(track)?;
        }
        session.sink = Some(peer.attach_remote_audio()?);

        let ChannelPair { channel, inbound } =
            peer.create_data_channel(EVENTS_CHANNEL_LABEL).await?;
        session.channel = Some(channel);

        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;

        let credential = session.credential.as_ref().ok_or(RelayError::Credential)?;
        let answer = self.api.negotiate(credential, offer).await?;
        peer.set_remote_description(&answer).await?;

        Ok(inbound)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::api::MockRelayApi;
    use std::sync::Mutex;

    fn token_ok(api: &mut MockRelayApi) {
        api.expect_fetch_token()
            .times(1)
            .returning(|_| Ok(SecretString::from("ek_test".to_string())));
    }

    fn negotiator(api: MockRelayApi, log: &Log, deny_mic: bool) -> SessionNegotiator {
        SessionNegotiator::new(
            Arc::new(api),
            Arc::new(FakeMicrophone {
                log: log.clone(),
                deny: deny_mic,
            }),
            Arc::new(FakePeerFactory::new(log.clone())),
        )
    }

    #[tokio::test]
    async fn test_start_call_negotiates_in_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        token_ok(&mut api);
        api.expect_negotiate()
            .withf(|_, offer| offer == "v=0 offer")
            .times(1)
            .returning(|_, _| Ok("v=0 answer".to_string()));

        let negotiator = negotiator(api, &log, false);
        let (session, _inbound) = negotiator.start_call("be brief").await.unwrap();

        assert!(session.is_ready());
        assert!(session.has_credential());
        assert!(negotiator.is_call_active());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "mic.open",
                "peer.create",
                "peer.add_track:mic-0",
                "peer.channel:oai-events",
                "peer.local",
                "peer.remote:v=0 answer",
            ]
        );
    }

    #[tokio::test]
    async fn test_end_releases_in_fixed_order_and_is_idempotent() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        token_ok(&mut api);
        api.expect_negotiate()
            .returning(|_, _| Ok("v=0 answer".to_string()));

        let negotiator = negotiator(api, &log, false);
        let (mut session, _inbound) = negotiator.start_call("x").await.unwrap();
        log.lock().unwrap().clear();

        session.end();
        session.end();
        drop(session);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["channel.close", "tracks.stop", "peer.close", "sink.detach"]
        );
        assert!(!negotiator.is_call_active());
    }

    #[tokio::test]
    async fn test_second_start_while_active_is_rejected() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        token_ok(&mut api);
        api.expect_negotiate()
            .returning(|_, _| Ok("v=0 answer".to_string()));

        let negotiator = negotiator(api, &log, false);
        let (_session, _inbound) = negotiator.start_call("x").await.unwrap();
        assert!(matches!(
            negotiator.start_call("x").await,
            Err(RelayError::CallAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_credential_failure_resets_flag() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        api.expect_fetch_token()
            .times(1)
            .returning(|_| Err(RelayError::Credential));
        api.expect_negotiate().never();

        let negotiator = negotiator(api, &log, false);
        assert!(negotiator.start_call("x").await.is_err());
        assert!(!negotiator.is_call_active());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_microphone_denied_aborts_before_peer() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        token_ok(&mut api);
        api.expect_negotiate().never();

        let negotiator = negotiator(api, &log, true);
        assert!(matches!(
            negotiator.start_call("x").await,
            Err(RelayError::Media(_))
        ));
        assert!(!negotiator.is_call_active());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negotiation_failure_releases_partial_session() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        token_ok(&mut api);
        api.expect_negotiate().times(1).returning(|_, _| {
            Err(RelayError::Status {
                endpoint: "/v1/realtime".into(),
                status: 401,
                body: "unauthorized".into(),
            })
        });

        let negotiator = negotiator(api, &log, false);
        assert!(negotiator.start_call("x").await.is_err());
        assert!(!negotiator.is_call_active());

        let log = log.lock().unwrap();
        let teardown: Vec<&str> = log
            .iter()
            .map(String::as_str)
            .skip_while(|entry| *entry != "channel.close")
            .collect();
        assert_eq!(
            teardown,
            vec!["channel.close", "tracks.stop", "peer.close", "sink.detach"]
        );
    }

    #[tokio::test]
    async fn test_can_restart_after_end() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockRelayApi::new();
        api.expect_fetch_token()
            .times(2)
            .returning(|_| Ok(SecretString::from("ek".to_string())));
        api.expect_negotiate()
            .times(2)
            .returning(|_, _| Ok("v=0 answer".to_string()));

        let negotiator = negotiator(api, &log, false);
        let (mut first, _rx) = negotiator.start_call("x").await.unwrap();
        first.end();
        let (second, _rx) = negotiator.start_call("x").await.unwrap();
        assert!(second.is_ready());
    }
}
