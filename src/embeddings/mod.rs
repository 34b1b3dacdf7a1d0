// Embeddings module
// Text chunking and the Ollama client that embeds chunks and answers chat prompts

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, ChunkingError, TextChunker};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};
