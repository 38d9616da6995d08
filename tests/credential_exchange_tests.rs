mod common;

use pretty_assertions::assert_eq;
use realtalk::audio::realtime::{
    CredentialExchange, Eagerness, MaxOutputTokens, PeerConnectionManager, PeerSettings,
    SessionConfig, SessionCredential, TurnDetection,
};
use realtalk::error::{ErrorCategory, RealtalkError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FakeConnector, FakeMedia, FAKE_OFFER};

fn config_for(server: &MockServer) -> SessionConfig {
    SessionConfig::builder()
        .api_key("sk-test")
        .session_url(format!("{}/v1/realtime/sessions", server.uri()))
        .webrtc_url(format!("{}/v1/realtime", server.uri()))
        .build()
}

fn credential() -> SessionCredential {
    SessionCredential {
        session_id: "sess_123".into(),
        ephemeral_key: "ek_abc".into(),
        expires_at: None,
    }
}

#[tokio::test]
async fn exchange_returns_ephemeral_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-realtime-preview",
            "voice": "alloy",
            "modalities": ["audio", "text"],
            "input_audio_format": "pcm16",
            "max_response_output_tokens": "inf"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_123",
            "object": "realtime.session",
            "client_secret": {"value": "ek_abc", "expires_at": 1_700_000_000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect("exchange should succeed");

    assert_eq!(credential.session_id, "sess_123");
    assert_eq!(credential.ephemeral_key, "ek_abc");
    assert_eq!(credential.expires_at, Some(1_700_000_000));
    assert!(!format!("{credential:?}").contains("ek_abc"));
}

#[tokio::test]
async fn semantic_vad_request_carries_eagerness() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .and(body_partial_json(json!({
            "temperature": 0.6,
            "max_response_output_tokens": 512,
            "turn_detection": {"type": "semantic_vad", "eagerness": "high"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_9",
            "client_secret": {"value": "ek_9"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.temperature = 0.6;
    config.max_response_output_tokens = MaxOutputTokens::Limited(512);
    config.turn_detection = TurnDetection::semantic_vad(Eagerness::High);

    let credential = CredentialExchange::new()
        .exchange(&config)
        .await
        .expect("exchange should succeed");
    assert_eq!(credential.ephemeral_key, "ek_9");
    assert_eq!(credential.expires_at, None);
}

#[tokio::test]
async fn rejected_exchange_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"error":{"message":"bad key"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let error = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect_err("401 should fail");

    match &error {
        RealtalkError::CredentialExchange { status, body } => {
            assert_eq!(*status, 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(error.category(), ErrorCategory::Authentication);
    assert!(error.to_string().starts_with("API request failed with status: 401."));
}

#[tokio::test]
async fn response_without_client_secret_is_a_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sess_1"})))
        .mount(&server)
        .await;

    let error = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect_err("missing secret should fail");
    assert!(matches!(error, RealtalkError::Protocol(_)));
}

#[tokio::test]
async fn response_without_session_id_is_a_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_secret": {"value": "ek_abc"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let error = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect_err("missing id should fail");
    assert!(matches!(error, RealtalkError::Protocol(ref message) if message.contains("id")));
    assert_eq!(error.category(), ErrorCategory::Protocol);
}

#[tokio::test]
async fn empty_session_id_is_a_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "",
            "client_secret": {"value": "ek_abc"}
        })))
        .mount(&server)
        .await;

    let error = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect_err("empty id should fail");
    assert!(matches!(error, RealtalkError::Protocol(_)));
}

#[tokio::test]
async fn non_json_success_body_is_a_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let error = CredentialExchange::new()
        .exchange(&config_for(&server))
        .await
        .expect_err("html should fail");
    assert!(matches!(error, RealtalkError::Serialization(_)));
}

fn manager() -> PeerConnectionManager {
    PeerConnectionManager::new(FakeMedia::new(), FakeConnector::new(), PeerSettings::default())
}

#[tokio::test]
async fn sdp_exchange_posts_offer_with_ephemeral_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(query_param("model", "gpt-4o-realtime-preview"))
        .and(header("authorization", "Bearer ek_abc"))
        .and(header("content-type", "application/sdp"))
        .and(body_string(FAKE_OFFER))
        .respond_with(ResponseTemplate::new(201).set_body_string("v=0\r\ns=answer\r\n"))
        .expect(1)
        .mount(&server)
        .await;

    let answer = manager()
        .exchange_sdp(&config_for(&server), &credential(), FAKE_OFFER.to_string())
        .await
        .expect("sdp exchange should succeed");
    assert_eq!(answer, "v=0\r\ns=answer\r\n");
}

#[tokio::test]
async fn sdp_rejection_is_a_negotiation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid offer"))
        .mount(&server)
        .await;

    let error = manager()
        .exchange_sdp(&config_for(&server), &credential(), FAKE_OFFER.to_string())
        .await
        .expect_err("400 should fail");

    match &error {
        RealtalkError::Negotiation { status, body } => {
            assert_eq!(*status, 400);
            assert_eq!(body, "invalid offer");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(error.to_string(), "SDP request failed with status: 400");
    assert_eq!(error.category(), ErrorCategory::Negotiation);
}
