use homeopathy_doctor_bot::llm::{CompletionClient, CompletionError, CompletionSettings};
use homeopathy_doctor_bot::session::ChatMessage;
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

fn settings(server: &MockServer, api_key: Option<&str>) -> CompletionSettings {
    CompletionSettings {
        api_key: api_key.map(str::to_string),
        api_base: format!("{}/", server.base_url()),
        model: "meta-llama/llama-3-8b-instruct".to_string(),
        temperature: 0.2,
        max_tokens: 500,
        timeout: Duration::from_secs(5),
        referer: "https://github.com".to_string(),
        title: "Homeopathy Telegram Bot".to_string(),
    }
}

fn complaint() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a homeopathy doctor."),
        ChatMessage::user("Throbbing headache, worse from light"),
    ]
}

#[tokio::test]
async fn completion_returns_first_choice_and_sends_attribution_headers() {
    let server = MockServer::start_async().await;

    let completion_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer test_key")
                .header("HTTP-Referer", "https://github.com")
                .header("X-Title", "Homeopathy Telegram Bot");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Consider Belladonna 30C." } }
                ]
            }));
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("test_key"))).unwrap();
    let reply = client.complete(&complaint()).await.unwrap();

    assert_eq!(reply, "Consider Belladonna 30C.");
    completion_mock.assert_async().await;
}

#[tokio::test]
async fn unauthorized_is_reported_separately() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401)
                .json_body(json!({ "error": { "message": "No auth credentials found" } }));
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("bad_key"))).unwrap();
    let err = client.complete(&complaint()).await.unwrap_err();

    match &err {
        CompletionError::Unauthorized(message) => assert_eq!(message, "No auth credentials found"),
        other => panic!("expected Unauthorized, got {:?}", other),
    }
    assert!(err.user_message().contains("(Error: 401)"));
}

#[tokio::test]
async fn api_errors_carry_status_and_message() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(404)
                .json_body(json!({ "error": { "message": "No endpoints found for model" } }));
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("test_key"))).unwrap();
    let err = client.complete(&complaint()).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(err.to_string().contains("No endpoints found for model"));
}

#[tokio::test]
async fn empty_choices_are_malformed() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("test_key"))).unwrap();
    let err = client.complete(&complaint()).await.unwrap_err();

    assert!(matches!(err, CompletionError::MalformedResponse(_)));
}

#[tokio::test]
async fn missing_key_never_reaches_the_network() {
    let server = MockServer::start_async().await;

    let completion_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200);
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("   "))).unwrap();
    let err = client.complete(&complaint()).await.unwrap_err();

    assert!(matches!(err, CompletionError::MissingApiKey));
    completion_mock.assert_calls(0);
}

#[tokio::test]
async fn models_are_listed() {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/models")
                .header("Authorization", "Bearer test_key");
            then.status(200).json_body(json!({
                "data": [
                    { "id": "deepseek/deepseek-chat", "name": "DeepSeek V3" },
                    { "id": "google/gemma-7b-it" }
                ]
            }));
        })
        .await;

    let client = CompletionClient::new(settings(&server, Some("test_key"))).unwrap();
    let models = client.list_models().await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].id, "deepseek/deepseek-chat");
    assert_eq!(models[0].name.as_deref(), Some("DeepSeek V3"));
    assert!(models[1].name.is_none());
}
