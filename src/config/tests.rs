use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn config_file_persistence() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config_path = temp_dir.path().join("config.toml");

    let mut original_config = Config::with_base_dir(temp_dir.path());
    original_config.ollama = OllamaConfig {
        protocol: "https".to_string(),
        host: "test-host".to_string(),
        port: 8080,
        model: "test-model".to_string(),
        batch_size: 32,
        embedding_dimension: 384,
    };
    original_config.uploads = UploadConfig { max_file_size: 1024 };

    let toml_content = toml::to_string_pretty(&original_config)
        .expect("config should convert to toml string successfully");
    fs::write(&config_path, toml_content).expect("should write to config_path successfully");

    let loaded_config = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(original_config, loaded_config);
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [ollama
        host = "localhost"
        port = "invalid_port"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn complete_valid_config() {
    let valid_toml = r#"
        [ollama]
        protocol = "http"
        host = "localhost"
        port = 11434
        model = "nomic-embed-text:latest"
        batch_size = 8
        embedding_dimension = 768

        [chunking]
        chunk_size = 800
        overlap = 100

        [retrieval]
        default_limit = 20
        snippet_length = 300

        [chat]
        model = "llama3.2:latest"
        context_chunks = 4
        history_messages = 6
        temperature = 0.3
        max_tokens = 512

        [uploads]
        max_file_size = 1048576
    "#;

    let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
    assert_eq!(config.ollama.batch_size, 8);
    assert_eq!(config.chunking.chunk_size, 800);
    assert_eq!(config.retrieval.snippet_length, 300);
    assert_eq!(config.chat.history_messages, 6);
    assert_eq!(config.uploads.max_file_size, 1_048_576);
    assert!(config.validate().is_ok());
}

#[test]
fn empty_host_is_invalid() {
    let mut config = Config::with_base_dir("/tmp");
    config.ollama.host = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn ollama_url_generation_with_different_hosts() {
    let configs = vec![
        ("http", "localhost", 11434, "http://localhost:11434/"),
        ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
        ("https", "secure.example.com", 443, "https://secure.example.com/"),
    ];

    for (protocol, host, port, expected_url) in configs {
        let ollama = OllamaConfig {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            ..OllamaConfig::default()
        };

        let url = ollama.ollama_url().expect("ollama_url is ok");
        assert_eq!(url.as_str(), expected_url);
    }
}

#[test]
fn chat_defaults_are_valid() {
    assert!(ChatConfig::default().validate().is_ok());
    assert_eq!(RetrievalConfig::default().snippet_length, 200);
}
