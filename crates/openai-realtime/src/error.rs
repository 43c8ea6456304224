use std::time::Duration;
use tutor_core::SessionError;

/// Failures while establishing the realtime peer connection.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("local offer is not valid SDP: {0}")]
    MalformedOffer(String),

    #[error("engine rejected the offer ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("engine answer is not valid SDP: {0}")]
    MalformedAnswer(String),

    #[error("SDP exchange failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("control channel did not open within {0:?}")]
    ChannelTimeout(Duration),
}

impl From<webrtc::Error> for NegotiationError {
    fn from(e: webrtc::Error) -> Self {
        NegotiationError::WebRtc(e.to_string())
    }
}

impl From<NegotiationError> for SessionError {
    fn from(e: NegotiationError) -> Self {
        match e {
            NegotiationError::Rejected { status, body } => SessionError::Upstream {
                status,
                message: body,
            },
            NegotiationError::MalformedOffer(_) | NegotiationError::MalformedAnswer(_) => {
                SessionError::Validation(e.to_string())
            }
            NegotiationError::Http(err) => SessionError::Upstream {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            },
            other => SessionError::Upstream {
                status: 0,
                message: other.to_string(),
            },
        }
    }
}
