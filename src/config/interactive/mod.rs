
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{ChatConfig, Config, ConfigError, OllamaConfig};
use crate::embeddings::chunking::ChunkingConfig;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Knowledge RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used for embeddings and chat.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Chat Configuration").bold().yellow());
    configure_chat(&mut config.chat)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Adjust chunking parameters?")
        .default(false)
        .interact()?
    {
        configure_chunking(&mut config.chunking)?;
    }

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting documents.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Embedding Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Chat Settings:").bold().yellow());
    eprintln!("  Model: {}", style(&config.chat.model).cyan());
    eprintln!("  Context Chunks: {}", style(config.chat.context_chunks).cyan());
    eprintln!("  History Messages: {}", style(config.chat.history_messages).cyan());
    eprintln!("  Temperature: {}", style(config.chat.temperature).cyan());
    eprintln!("  Max Tokens: {}", style(config.chat.max_tokens).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!("  Chunk Overlap: {}", style(config.chunking.overlap).cyan());
    eprintln!(
        "  Default Search Limit: {}",
        style(config.retrieval.default_limit).cyan()
    );
    eprintln!(
        "  Max Upload Size: {} bytes",
        style(config.uploads.max_file_size).cyan()
    );

    eprintln!();
    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
    eprintln!("Data directory: {}", style(config.get_base_dir().display()).dim());

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Config::with_base_dir(config_dir)
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            }
            .validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Concurrent embedding requests")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_chat(chat: &mut ChatConfig) -> Result<()> {
    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(chat.model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Sampling temperature")
        .default(chat.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    let context_chunks: usize = Input::new()
        .with_prompt("Context chunks per question")
        .default(chat.context_chunks)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=20).contains(input) {
                Ok(())
            } else {
                Err("Context chunks must be between 1 and 20")
            }
        })
        .interact_text()?;

    chat.set_model(model)?;
    chat.set_temperature(temperature)?;
    chat.context_chunks = context_chunks;

    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (100..=8192).contains(input) {
                Ok(())
            } else {
                Err("Chunk size must be between 100 and 8192")
            }
        })
        .interact_text()?;

    let overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(chunking.overlap.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input < chunk_size {
                Ok(())
            } else {
                Err("Overlap must be smaller than the chunk size")
            }
        })
        .interact_text()?;

    chunking.chunk_size = chunk_size;
    chunking.overlap = overlap;
    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Model name cannot be empty")
    } else {
        Ok(())
    }
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
