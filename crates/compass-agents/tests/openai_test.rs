use compass_agents::{LlmMessage, LlmProvider, LlmRequest, OpenAiProvider, ResponseFormat};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(format: ResponseFormat) -> LlmRequest {
    LlmRequest {
        model: "gpt-4o".to_string(),
        messages: vec![LlmMessage::user("Which clubs should I join?")],
        system: Some("You are a college counselor.".to_string()),
        max_tokens: Some(1500),
        temperature: Some(0.7),
        response_format: format,
    }
}

#[tokio::test]
async fn test_openai_completion() {
    let mock_server = MockServer::start().await;

    let response_body = json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-4o-2024-08-06",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Join the robotics club."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 6, "total_tokens": 26}
    });

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "You are a college counselor."},
                {"role": "user", "content": "Which clubs should I join?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let response = provider.complete(&request(ResponseFormat::Text)).await.unwrap();

    assert_eq!(response.text, "Join the robotics club.");
    assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    let usage = response.usage.unwrap();
    assert_eq!(usage.input_tokens, 20);
    assert_eq!(usage.output_tokens, 6);
}

#[tokio::test]
async fn test_openai_json_mode_sets_response_format() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "{\"needs_routing\": false}"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let response = provider
        .complete(&request(ResponseFormat::JsonObject))
        .await
        .unwrap();
    assert_eq!(response.text, "{\"needs_routing\": false}");
}

#[tokio::test]
async fn test_openai_error_status_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let err = provider
        .complete(&request(ResponseFormat::Text))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("OpenAI API error: status=429"), "{message}");
    assert!(message.contains("rate limited"));
}

#[tokio::test]
async fn test_openai_empty_choices_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model": "gpt-4o", "choices": []})))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let err = provider
        .complete(&request(ResponseFormat::Text))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No choices"));
}

#[tokio::test]
async fn test_openai_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    let healthy = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    assert!(healthy.health_check().await.unwrap());

    let unreachable = OpenAiProvider::new("test-key".to_string(), Some("http://127.0.0.1:9".into()));
    assert!(!unreachable.health_check().await.unwrap());
}
