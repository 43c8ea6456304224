use openai_realtime::{
    CredentialProvider, EphemeralCredential, NegotiationError, TokenBroker, sdp,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tutor_core::SessionError;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, body_string, header, method, path, query_param},
};

const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

fn broker(server: &MockServer) -> TokenBroker {
    TokenBroker::new(Some(SecretString::from("sk-test".to_string())))
        .with_api_base(format!("{}/v1", server.uri()))
}

#[tokio::test]
async fn test_issues_credential_from_top_level_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "session": {"type": "realtime", "model": "gpt-realtime", "audio": {"output": {"voice": "alloy"}}}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"value": "ek_abc", "expires_at": 1756000000})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credential = broker(&server).request_ephemeral_credential().await.unwrap();
    assert_eq!(credential.value.expose_secret(), "ek_abc");
    assert_eq!(credential.expires_at, Some(1756000000));
}

#[tokio::test]
async fn test_issues_credential_from_nested_client_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"client_secret": {"value": "ek_nested", "expires_at": 42}})),
        )
        .mount(&server)
        .await;

    let credential = broker(&server).request_ephemeral_credential().await.unwrap();
    assert_eq!(credential.value.expose_secret(), "ek_nested");
    assert_eq!(credential.expires_at, Some(42));
}

#[tokio::test]
async fn test_issuer_rejection_carries_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
        .mount(&server)
        .await;

    let err = broker(&server).request_ephemeral_credential().await.unwrap_err();
    match err {
        SessionError::Upstream { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_success_without_token_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess_1"})))
        .mount(&server)
        .await;

    let err = broker(&server).request_ephemeral_credential().await.unwrap_err();
    assert!(matches!(err, SessionError::Upstream { status: 200, .. }));
}

#[tokio::test]
async fn test_sdp_exchange_returns_sanitized_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .and(query_param("model", "gpt-realtime"))
        .and(header("authorization", "Bearer ek_abc"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(OFFER))
        .respond_with(ResponseTemplate::new(201).set_body_string("\"v=0\\r\\ns=-\\r\\n\""))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1/realtime/calls?model=gpt-realtime", server.uri());
    let credential = EphemeralCredential::new("ek_abc", None);
    let answer = sdp::exchange(&reqwest::Client::new(), &url, &credential, OFFER)
        .await
        .unwrap();
    assert_eq!(answer, "v=0\r\ns=-\r\n");
}

#[tokio::test]
async fn test_sdp_exchange_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .respond_with(ResponseTemplate::new(503).set_body_string("engine overloaded"))
        .mount(&server)
        .await;

    let url = format!("{}/v1/realtime/calls?model=gpt-realtime", server.uri());
    let err = sdp::exchange(
        &reqwest::Client::new(),
        &url,
        &EphemeralCredential::new("ek_abc", None),
        OFFER,
    )
    .await
    .unwrap_err();
    match err {
        NegotiationError::Rejected { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "engine overloaded");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_sdp_exchange_non_sdp_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let url = format!("{}/v1/realtime/calls?model=gpt-realtime", server.uri());
    let err = sdp::exchange(
        &reqwest::Client::new(),
        &url,
        &EphemeralCredential::new("ek_abc", None),
        OFFER,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, NegotiationError::MalformedAnswer(_)));
}

#[tokio::test]
async fn test_invalid_offer_never_reaches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = format!("{}/v1/realtime/calls", server.uri());
    let err = sdp::exchange(
        &reqwest::Client::new(),
        &url,
        &EphemeralCredential::new("ek_abc", None),
        "garbage",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, NegotiationError::MalformedOffer(_)));
}
