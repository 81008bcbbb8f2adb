use super::*;
use crate::errors::LeadlineError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn synthesizer(base: String) -> ElevenLabsSynthesizer {
    ElevenLabsSynthesizer::new(&ElevenLabsConfig {
        api_key: "xi_key".into(),
        voice_id: "voice123".into(),
        api_base: Some(base),
        ..ElevenLabsConfig::default()
    })
}

#[tokio::test]
async fn test_synthesize_returns_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/text-to-speech/voice123"))
        .and(header("xi-api-key", "xi_key"))
        .and(body_partial_json(json!({"text": "Thanks for calling"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(vec![0xFF, 0xFB, 0x90]),
        )
        .mount(&server)
        .await;

    let audio = synthesizer(server.uri())
        .synthesize("Thanks for calling")
        .await
        .unwrap();
    assert_eq!(audio.bytes, vec![0xFF, 0xFB, 0x90]);
    assert_eq!(audio.mime_type, "audio/mpeg");
}

#[tokio::test]
async fn test_synthesize_empty_audio_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(synthesizer(server.uri()).synthesize("hi").await.is_err());
}

#[tokio::test]
async fn test_synthesize_quota_exceeded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = synthesizer(server.uri()).synthesize("hi").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LeadlineError>(),
        Some(LeadlineError::RateLimit { retry_after: None })
    ));
}
