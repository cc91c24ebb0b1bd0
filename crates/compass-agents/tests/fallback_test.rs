use std::sync::Arc;

use compass_agents::{AgentCaller, CallInput, OpenAiProvider, ProviderRegistry};
use compass_common::Error;
use compass_config::{AgentConfig, ModelSpec, ProviderConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(text: &str) -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    })
}

fn settings() -> ProviderConfig {
    ProviderConfig {
        api_key: "test-key".into(),
        base_url: None,
        retry_attempts: 2,
        retry_backoff_ms: 1,
    }
}

fn agent(fallback: Option<ModelSpec>) -> AgentConfig {
    AgentConfig {
        model: ModelSpec {
            provider: "openai".into(),
            model_name: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: Some(1500),
        },
        system_prompt_template: "primary_counselor".into(),
        fallback,
    }
}

fn caller(server: &MockServer) -> AgentCaller {
    let mut registry = ProviderRegistry::new();
    registry.register(
        Arc::new(OpenAiProvider::new("test-key".into(), Some(server.uri()))),
        settings(),
    );
    AgentCaller::new(Arc::new(registry))
}

#[tokio::test]
async fn retries_server_errors_then_uses_fallback_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Fallback answer")))
        .expect(1)
        .mount(&server)
        .await;

    let fallback = ModelSpec {
        provider: "openai".into(),
        model_name: "gpt-4o-mini".into(),
        temperature: 0.7,
        max_tokens: None,
    };
    let text = caller(&server)
        .call(&agent(Some(fallback)), &CallInput::prompt("Hello"))
        .await
        .unwrap();
    assert_eq!(text, "Fallback answer");
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = caller(&server)
        .call(&agent(None), &CallInput::prompt("Hello"))
        .await
        .unwrap_err();

    match err {
        Error::Agent(message) => {
            assert!(message.starts_with("Failed to get response from primary_counselor"));
            assert!(message.contains("status=401"));
        }
        other => panic!("expected agent error, got {other:?}"),
    }
}

#[tokio::test]
async fn recovers_after_transient_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Second try")))
        .mount(&server)
        .await;

    let text = caller(&server)
        .call(&agent(None), &CallInput::prompt("Hello"))
        .await
        .unwrap();
    assert_eq!(text, "Second try");
}
