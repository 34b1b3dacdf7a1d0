#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Ollama client tests against a mock HTTP server, plus a few tests that
// need a real local Ollama instance. Run those with:
// cargo test --test integration_ollama -- --ignored

use serde_json::{Value, json};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use knowledge_rag::chat::{ChatModel, ChatService, PromptMessage, PromptRole};
use knowledge_rag::config::Config;
use knowledge_rag::database::sqlite::Database;
use knowledge_rag::embeddings::ollama::OllamaClient;
use knowledge_rag::ingest::DocumentIngestor;
use knowledge_rag::retrieval::{
    CollaboratorError, EmbeddingGateway, InMemoryVectorIndex, VectorIndex,
};

const EMBED_MODEL: &str = "nomic-embed-text:latest";
const CHAT_MODEL: &str = "llama3.2:latest";

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn mock_config(server: &MockServer, base_dir: &std::path::Path) -> Config {
    let address = server.address();
    let mut config = Config::with_base_dir(base_dir);
    config.ollama.host = address.ip().to_string();
    config.ollama.port = address.port();
    config.ollama.model = EMBED_MODEL.to_string();
    config.chat.model = CHAT_MODEL.to_string();
    config
}

fn mock_client(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&mock_config(server, std::path::Path::new("/tmp/knowledge-rag-mock")))
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(3)
        .with_retry_delay(Duration::from_millis(10))
}

fn embedding_response(vector: &[f32]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": EMBED_MODEL,
        "embeddings": [vector],
    }))
}

fn chat_response(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": CHAT_MODEL,
        "message": {"role": "assistant", "content": content},
        "done": true,
    }))
}

fn tags_response(names: &[&str]) -> ResponseTemplate {
    let models: Vec<Value> = names
        .iter()
        .map(|name| json!({"name": name, "size": 274302450, "digest": "abc123"}))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({"models": models}))
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_request_and_response() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": EMBED_MODEL, "input": "hello world"})))
        .respond_with(embedding_response(&[0.1, 0.2, 0.3]))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let vector = client
        .embed("hello world")
        .await
        .expect("embedding should succeed");
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_embedding_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
        .mount(&server)
        .await;

    let result = mock_client(&server).embed("anything").await;
    assert!(matches!(result, Err(CollaboratorError::Embedding(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embedding_response(&[1.0, 0.0]))
        .expect(1)
        .mount(&server)
        .await;

    let vector = mock_client(&server)
        .embed("retry me")
        .await
        .expect("third attempt should succeed");
    assert_eq!(vector, vec![1.0, 0.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = mock_client(&server).embed("missing model").await;
    let Err(CollaboratorError::Embedding(message)) = result else {
        panic!("expected an embedding error, got {:?}", result);
    };
    assert!(message.contains("404"), "unexpected message: {}", message);
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_completion_is_non_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": CHAT_MODEL,
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .respond_with(chat_response("Hello!"))
        .expect(1)
        .mount(&server)
        .await;

    let reply = mock_client(&server)
        .complete(&[
            PromptMessage::new(PromptRole::System, "Be brief."),
            PromptMessage::new(PromptRole::User, "Hi"),
        ])
        .await
        .expect("chat should succeed");
    assert_eq!(reply, "Hello!");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_requires_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(tags_response(&[EMBED_MODEL]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.9.0"})))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let outcome = tokio::task::spawn_blocking(move || {
        let ping = client.ping();
        let models = client.list_models();
        let health = client.health_check();
        (ping, models, health)
    })
    .await
    .expect("blocking task should finish");

    assert!(outcome.0.is_ok(), "ping should succeed: {:?}", outcome.0);
    let models = outcome.1.expect("listing models should succeed");
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, EMBED_MODEL);
    let health = outcome.2.expect_err("chat model is missing");
    assert!(health.to_string().contains(CHAT_MODEL));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_passes_with_both_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(tags_response(&[EMBED_MODEL, CHAT_MODEL]))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let health = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("blocking task should finish");
    assert!(health.is_ok(), "health check should pass: {:?}", health);
}

/// Ingest and ask through the real client, with the mock server standing in
/// for the embedding and chat models
#[tokio::test(flavor = "multi_thread")]
async fn chat_round_trip_through_ollama() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(embedding_response(&[0.6, 0.8, 0.0]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_response("Water the ferns every Tuesday."))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("temp dir");
    let config = mock_config(&server, temp_dir.path());
    let client = Arc::new(
        OllamaClient::new(&config)
            .expect("client")
            .with_retry_delay(Duration::from_millis(10)),
    );
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("database");
    let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    let embeddings: Arc<dyn EmbeddingGateway> = Arc::clone(&client) as Arc<dyn EmbeddingGateway>;

    let source = temp_dir.path().join("ferns.txt");
    std::fs::write(&source, "Ferns like water on Tuesdays and indirect light.").expect("write");
    let ingestor = DocumentIngestor::new(
        database.clone(),
        Arc::clone(&embeddings),
        Arc::clone(&index),
        &config,
    )
    .expect("ingestor");
    let report = ingestor.ingest_file(&source, 1).await.expect("ingest");
    assert_eq!(report.chunks, 1);

    let chat = ChatService::new(
        database,
        embeddings,
        index,
        Arc::clone(&client) as Arc<dyn ChatModel>,
        &config.chat,
    );
    let session = chat.create_session(1, None).await.expect("session");
    let reply = chat
        .send_message(session.id, 1, "When do I water the ferns?")
        .await
        .expect("reply");

    assert_eq!(reply.message, "Water the ferns every Tuesday.");
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].filename, "ferns.txt");

    let requests = server.received_requests().await.expect("recording enabled");
    let chat_request = requests
        .iter()
        .find(|request| request.url.path() == "/api/chat")
        .expect("chat request was sent");
    let body: Value = serde_json::from_slice(&chat_request.body).expect("json body");
    let system_prompt = body["messages"][0]["content"].as_str().expect("system prompt");
    assert!(system_prompt.contains("Ferns like water on Tuesdays"));
    let last = body["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .expect("messages");
    assert_eq!(last["role"], "user");
    assert_eq!(last["content"], "When do I water the ferns?");
}

fn create_local_client() -> OllamaClient {
    let mut config = Config::with_base_dir("/tmp/knowledge-rag-local");
    config.ollama.host = env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
    config.ollama.port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(11434);
    config.ollama.model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| EMBED_MODEL.to_string());

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_ping_and_models() {
    init_test_tracing();
    let client = create_local_client();

    client.ping().expect("ping should succeed against local Ollama");
    let models = client.list_models().expect("should list models");
    info!("Local Ollama has {} models", models.len());
    assert!(!models.is_empty());
}

#[test]
#[ignore = "requires a local Ollama instance with an embedding model"]
fn real_ollama_embedding_dimension() {
    init_test_tracing();
    let client = create_local_client();

    let embedding = client
        .generate_embedding("The quick brown fox jumps over the lazy dog")
        .expect("should embed");
    assert_eq!(embedding.len(), 768, "nomic-embed-text produces 768 dimensions");
    assert!(embedding.iter().all(|value| value.is_finite()));
}
