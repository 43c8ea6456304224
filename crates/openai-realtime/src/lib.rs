//! WebRTC transport to the OpenAI Realtime engine.
//!
//! - [`broker`] issues ephemeral client secrets from the server-side key.
//! - [`negotiator`] builds the peer connection, opens the `oai-events`
//!   control channel and performs the SDP offer/answer exchange.
//! - [`protocol`] maps control messages to and from their wire JSON.
//! - [`audio`] supplies the outbound Opus track.

pub mod audio;
pub mod broker;
pub mod error;
pub mod negotiator;
pub mod protocol;
pub mod sdp;

pub use audio::{AudioSource, MicrophoneTrack, OggOpusFileSource, SilentSource};
pub use broker::{CredentialProvider, EphemeralCredential, TokenBroker};
pub use error::NegotiationError;
pub use negotiator::{Connection, ControlLink, LinkEvent, Negotiator, PeerState, WebRtcNegotiator};
pub use protocol::parse_frame;
