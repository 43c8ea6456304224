//! Offer/answer exchange with the realtime engine over plain HTTP.

use crate::{broker::EphemeralCredential, error::NegotiationError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// A local offer must describe a session and carry an audio section.
pub fn validate_offer(sdp: &str) -> Result<(), NegotiationError> {
    if !sdp.trim_start().starts_with("v=0") {
        return Err(NegotiationError::MalformedOffer(
            "offer does not start with v=0".to_string(),
        ));
    }
    if !sdp.contains("m=audio") {
        return Err(NegotiationError::MalformedOffer(
            "offer has no audio media section".to_string(),
        ));
    }
    Ok(())
}

/// Normalises the answer body. Some proxies return the SDP as a JSON
/// string, quoted and with escaped line breaks.
pub fn sanitize_answer(body: &str) -> Result<String, NegotiationError> {
    let mut sdp = body.trim();
    if sdp.len() >= 2 && sdp.starts_with('"') && sdp.ends_with('"') {
        sdp = &sdp[1..sdp.len() - 1];
    }
    let mut sdp = sdp.replace("\\r\\n", "\r\n").replace("\\n", "\n");
    if !sdp.starts_with("v=") {
        let preview: String = sdp.chars().take(80).collect();
        return Err(NegotiationError::MalformedAnswer(preview));
    }
    if !sdp.ends_with('\n') {
        sdp.push_str("\r\n");
    }
    Ok(sdp)
}

/// Posts the raw offer and returns the sanitised answer.
pub async fn exchange(
    http: &reqwest::Client,
    url: &str,
    credential: &EphemeralCredential,
    offer: &str,
) -> Result<String, NegotiationError> {
    validate_offer(offer)?;
    debug!(%url, offer_len = offer.len(), "Posting SDP offer");

    let response = http
        .post(url)
        .bearer_auth(credential.value.expose_secret())
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .header(ACCEPT, SDP_CONTENT_TYPE)
        .body(offer.to_string())
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        warn!(status = status.as_u16(), "Engine rejected SDP offer");
        return Err(NegotiationError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    sanitize_answer(&body)
}
