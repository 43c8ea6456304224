//! Connection Negotiator: peer connection, outbound audio, the `oai-events`
//! control channel and the SDP exchange that ties them to the engine.

use crate::{
    audio::MicrophoneTrack,
    broker::{DEFAULT_API_BASE, DEFAULT_REALTIME_MODEL, EphemeralCredential},
    error::NegotiationError,
    protocol::ClientEvent,
    sdp,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, instrument, warn};
use tutor_core::channel::ControlMessage;
use webrtc::{
    api::{
        APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::MediaEngine,
    },
    data_channel::{RTCDataChannel, data_channel_message::DataChannelMessage},
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    track::track_local::TrackLocal,
};

pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";
pub const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                PeerState::Failed
            }
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// One text frame from the control channel.
    Frame(String),
    PeerState(PeerState),
    /// The control channel closed or errored.
    Closed(String),
}

/// The established control link. Inbound traffic arrives separately on
/// the [`Connection`]'s event receiver.
#[async_trait]
pub trait ControlLink: Send + Sync {
    async fn send(&self, message: &ControlMessage) -> Result<()>;
    /// Closes the channel and the transport. Safe to call more than once.
    async fn close(&self);
}

pub struct Connection {
    pub link: Box<dyn ControlLink>,
    pub events: mpsc::Receiver<LinkEvent>,
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn connect(
        &self,
        credential: &EphemeralCredential,
        microphone: &MicrophoneTrack,
    ) -> Result<Connection, NegotiationError>;
}

pub struct WebRtcNegotiator {
    http: reqwest::Client,
    api_base: String,
    model: String,
    open_timeout: Duration,
    live_peers: Arc<AtomicUsize>,
}

/// Owns a peer connection until it is closed. Dropping an unclosed handle,
/// as happens when a `connect` future is cancelled mid-negotiation, closes
/// the peer on a background task.
struct PeerHandle {
    pc: Arc<RTCPeerConnection>,
    live: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl PeerHandle {
    fn new(pc: Arc<RTCPeerConnection>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            pc,
            live,
            closed: AtomicBool::new(false),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        close_peer(&self.pc, &self.live).await;
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pc = self.pc.clone();
        let live = self.live.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Peer connection dropped while open, closing in background");
                handle.spawn(async move { close_peer(&pc, &live).await });
            }
            Err(_) => {
                warn!("Peer connection dropped outside a runtime");
                live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

async fn close_peer(pc: &RTCPeerConnection, live: &AtomicUsize) {
    if let Err(e) = pc.close().await {
        debug!(error = %e, "Peer connection close");
    }
    live.fetch_sub(1, Ordering::SeqCst);
}

impl Default for WebRtcNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl WebRtcNegotiator {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            open_timeout: CHANNEL_OPEN_TIMEOUT,
            live_peers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Peer connections built by this negotiator that are not closed yet.
    pub fn live_peers(&self) -> usize {
        self.live_peers.load(Ordering::SeqCst)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn calls_url(&self) -> String {
        format!("{}/realtime/calls?model={}", self.api_base, self.model)
    }

    async fn build_peer(&self) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Arc::new(
            api.new_peer_connection(RTCConfiguration::default()).await?,
        ))
    }

    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        credential: &EphemeralCredential,
        microphone: &MicrophoneTrack,
    ) -> Result<(Arc<RTCDataChannel>, mpsc::Receiver<LinkEvent>), NegotiationError> {
        let (tx, rx) = mpsc::channel::<LinkEvent>(256);

        let state_tx = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let state_tx = state_tx.clone();
            let peer_state = PeerState::from(state);
            info!(state = ?peer_state, "Peer connection state changed");
            Box::pin(async move {
                let _ = state_tx.send(LinkEvent::PeerState(peer_state)).await;
            })
        }));

        // Remote audio is played by the engine's side; here it is only drained.
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            Box::pin(async move {
                debug!(codec = %track.codec().capability.mime_type, "Remote track received");
                tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
            })
        }));

        let sender = pc
            .add_track(microphone.local_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let channel = pc.create_data_channel(CONTROL_CHANNEL_LABEL, None).await?;
        let opened = Arc::new(Notify::new());
        let notify = opened.clone();
        channel.on_open(Box::new(move || {
            info!("Control channel open");
            notify.notify_one();
            Box::pin(async {})
        }));
        let frame_tx = tx.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let frame_tx = frame_tx.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = frame_tx.send(LinkEvent::Frame(text)).await;
                    }
                    Err(_) => debug!("Dropping binary control frame"),
                }
            })
        }));
        let close_tx = tx.clone();
        channel.on_close(Box::new(move || {
            let close_tx = close_tx.clone();
            Box::pin(async move {
                let _ = close_tx
                    .send(LinkEvent::Closed("control channel closed".to_string()))
                    .await;
            })
        }));
        let error_tx = tx;
        channel.on_error(Box::new(move |err| {
            let error_tx = error_tx.clone();
            Box::pin(async move {
                let _ = error_tx
                    .send(LinkEvent::Closed(format!("control channel error: {}", err)))
                    .await;
            })
        }));

        let offer = pc.create_offer(None).await?;
        let mut gathering = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        let _ = gathering.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::MalformedOffer("no local description".into()))?;

        let answer = sdp::exchange(&self.http, &self.calls_url(), credential, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer)
            .map_err(|e| NegotiationError::MalformedAnswer(e.to_string()))?;
        pc.set_remote_description(answer).await?;

        tokio::time::timeout(self.open_timeout, opened.notified())
            .await
            .map_err(|_| NegotiationError::ChannelTimeout(self.open_timeout))?;
        Ok((channel, rx))
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn connect(
        &self,
        credential: &EphemeralCredential,
        microphone: &MicrophoneTrack,
    ) -> Result<Connection, NegotiationError> {
        let peer = PeerHandle::new(self.build_peer().await?, self.live_peers.clone());
        match self.negotiate(&peer.pc, credential, microphone).await {
            Ok((channel, events)) => Ok(Connection {
                link: Box::new(WebRtcLink {
                    peer,
                    channel,
                    closed: AtomicBool::new(false),
                }),
                events,
            }),
            Err(e) => {
                warn!(error = %e, "Negotiation failed, closing peer connection");
                peer.close().await;
                Err(e)
            }
        }
    }
}

pub struct WebRtcLink {
    peer: PeerHandle,
    channel: Arc<RTCDataChannel>,
    closed: AtomicBool,
}

#[async_trait]
impl ControlLink for WebRtcLink {
    async fn send(&self, message: &ControlMessage) -> Result<()> {
        let payload = serde_json::to_string(&ClientEvent::from(message))?;
        self.channel
            .send_text(payload)
            .await
            .context("control channel send failed")?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "Control channel close");
        }
        self.peer.close().await;
        info!("Realtime link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSource, SilentSource};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn wait_for_no_live_peers(negotiator: &WebRtcNegotiator) {
        for _ in 0..100 {
            if negotiator.live_peers() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_cancelled_connect_closes_peer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/calls"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string("v=0\r\n")
                    .set_delay(Duration::from_secs(60)),
            )
            .mount(&server)
            .await;
        let negotiator = WebRtcNegotiator::new().with_api_base(format!("{}/v1", server.uri()));
        let source = SilentSource::new();
        let mic = source.acquire().await.unwrap();
        let credential = EphemeralCredential::new("ek_test", None);

        for _ in 0..3 {
            let attempt = tokio::time::timeout(
                Duration::from_millis(1500),
                negotiator.connect(&credential, &mic),
            )
            .await;
            assert!(attempt.is_err(), "connect should still be waiting on the answer");
        }

        wait_for_no_live_peers(&negotiator).await;
        assert_eq!(negotiator.live_peers(), 0);
    }

    #[tokio::test]
    async fn test_rejected_connect_closes_peer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/realtime/calls"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let negotiator = WebRtcNegotiator::new().with_api_base(format!("{}/v1", server.uri()));
        let source = SilentSource::new();
        let mic = source.acquire().await.unwrap();

        let err = negotiator
            .connect(&EphemeralCredential::new("ek_test", None), &mic)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, NegotiationError::Rejected { status: 500, .. }));
        assert_eq!(negotiator.live_peers(), 0);
    }

    #[test]
    fn test_peer_state_from_rtc() {
        assert_eq!(PeerState::from(RTCPeerConnectionState::Connected), PeerState::Connected);
        assert_eq!(PeerState::from(RTCPeerConnectionState::Disconnected), PeerState::Failed);
        assert_eq!(PeerState::from(RTCPeerConnectionState::Closed), PeerState::Closed);
    }

    #[test]
    fn test_calls_url() {
        let negotiator = WebRtcNegotiator::new()
            .with_api_base("http://localhost:9000/v1/")
            .with_model("gpt-realtime-mini");
        assert_eq!(
            negotiator.calls_url(),
            "http://localhost:9000/v1/realtime/calls?model=gpt-realtime-mini"
        );
    }
}
