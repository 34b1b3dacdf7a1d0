use super::*;
use crate::chat::PromptRole;

fn test_config() -> Config {
    let mut config = Config::with_base_dir("/tmp/knowledge-rag-test");
    config.ollama.host = "test-host".to_string();
    config.ollama.port = 1234;
    config.ollama.model = "test-embed".to_string();
    config.chat.model = "test-chat".to_string();
    config.chat.temperature = 0.3;
    config.chat.max_tokens = 256;
    config
}

#[test]
fn client_configuration() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");

    assert_eq!(client.model, "test-embed");
    assert_eq!(client.chat_model, "test-chat");
    assert_eq!(client.max_tokens, 256);
    assert_eq!(client.base_url().host_str(), Some("test-host"));
    assert_eq!(client.base_url().port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&test_config())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0)
        .with_retry_delay(Duration::from_millis(5));

    assert_eq!(client.retry_attempts, 1);
    assert_eq!(client.retry_delay, Duration::from_millis(5));
}

#[test]
fn embed_request_uses_input_field() {
    let json = serde_json::to_value(EmbedRequest {
        model: "m",
        input: "hello",
    })
    .expect("serializes");
    assert_eq!(json, serde_json::json!({"model": "m", "input": "hello"}));
}

#[test]
fn chat_request_is_non_streaming_with_options() {
    let messages = vec![PromptMessage::new(PromptRole::User, "hi")];
    let json = serde_json::to_value(ChatRequest {
        model: "chat",
        messages: &messages,
        stream: false,
        options: ChatOptions {
            temperature: 0.5,
            num_predict: 100,
        },
    })
    .expect("serializes");

    assert_eq!(json["stream"], false);
    assert_eq!(json["options"]["num_predict"], 100);
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn unreachable_server_is_a_collaborator_error() {
    let mut config = test_config();
    config.ollama.host = "127.0.0.1".to_string();
    config.ollama.port = 1;
    let client = OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_retry_attempts(1)
        .with_timeout(Duration::from_secs(2));

    assert!(matches!(
        client.embed("hello").await,
        Err(CollaboratorError::Embedding(_))
    ));
    assert!(matches!(
        client.complete(&[]).await,
        Err(CollaboratorError::Model(_))
    ));
}
