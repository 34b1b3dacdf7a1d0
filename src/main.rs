use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use knowledge_rag::commands::{
    SearchOptions, add_document, analytics_documents, analytics_performance, analytics_usage,
    chat_ask, chat_delete, chat_history, chat_list, chat_new, chat_rename, delete_document,
    list_documents, maintain, search_documents, serve_mcp, show_document, show_status, similar_documents,
};
use knowledge_rag::config::{Config, run_interactive_config, show_config};
use knowledge_rag::analytics::DEFAULT_USAGE_DAYS;
use knowledge_rag::ingest::DEFAULT_LIST_LIMIT;
use knowledge_rag::retrieval::{DEFAULT_SIMILAR_LIMIT, FileCategory, SearchMode};
use knowledge_rag::{RagError, Result};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "knowledge-rag")]
#[command(about = "A personal document knowledge base with hybrid search, chat and an MCP server")]
#[command(version)]
struct Cli {
    /// Owner whose documents and sessions are used
    #[arg(long, global = true, default_value_t = 1)]
    owner: i64,

    /// Use this directory instead of the default configuration directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Upload a file, extract its text and index it
    Add {
        /// Path of the file to add
        file: PathBuf,
    },
    /// List documents, newest first
    List {
        /// Only documents whose filename or content contains this text
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
    },
    /// Show one document
    Show {
        /// Document ID
        id: i64,
    },
    /// Delete a document, its chunks and its vectors
    Delete {
        /// Document ID
        id: i64,
    },
    /// Search documents by text, meaning or both
    Search {
        query: String,
        /// Maximum number of results (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
        /// text, semantic or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        /// pdf, word, text or image
        #[arg(long)]
        category: Option<FileCategory>,
        /// Earliest upload date, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest upload date, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Find documents similar to a document
    Similar {
        /// Document ID
        id: i64,
        #[arg(long, default_value_t = DEFAULT_SIMILAR_LIMIT)]
        limit: usize,
    },
    /// Chat with your documents
    #[command(subcommand)]
    Chat(ChatCommands),
    /// Usage, document and search reports
    #[command(subcommand)]
    Analytics(AnalyticsCommands),
    /// Start MCP server on stdio
    Serve,
    /// Show status of the stores and the model server
    Status,
    /// Optimize both databases and build the vector index
    Maintain {
        /// Recreate the vector table and refill it from stored embeddings
        #[arg(long)]
        repair: bool,
    },
}

#[derive(Subcommand)]
enum ChatCommands {
    /// Start a new session
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// List sessions
    List,
    /// Show the messages of a session
    History { session: i64 },
    /// Ask a question, starting a new session unless one is given
    Ask {
        question: String,
        #[arg(long)]
        session: Option<i64>,
    },
    /// Rename a session
    Rename { session: i64, title: String },
    /// Delete a session and its messages
    Delete { session: i64 },
}

#[derive(Subcommand)]
enum AnalyticsCommands {
    /// Activity totals for a trailing window
    Usage {
        #[arg(long, default_value_t = DEFAULT_USAGE_DAYS)]
        days: u32,
    },
    /// Document counts by type and recent uploads
    Documents,
    /// Search volume and popular queries
    Performance,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport when serving
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir().map_err(|e| RagError::Config(e.to_string()))?,
    };
    let owner = cli.owner;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Add { file } => add_document(&config_dir, owner, &file).await?,
        Commands::List {
            search,
            skip,
            limit,
        } => list_documents(&config_dir, owner, search.as_deref(), skip, limit).await?,
        Commands::Show { id } => show_document(&config_dir, owner, id).await?,
        Commands::Delete { id } => delete_document(&config_dir, owner, id).await?,
        Commands::Search {
            query,
            limit,
            mode,
            category,
            from,
            to,
        } => {
            let options = SearchOptions {
                limit,
                mode,
                category,
                from,
                to,
            };
            search_documents(&config_dir, owner, &query, options).await?;
        }
        Commands::Similar { id, limit } => similar_documents(&config_dir, owner, id, limit).await?,
        Commands::Chat(command) => match command {
            ChatCommands::New { title } => chat_new(&config_dir, owner, title.as_deref()).await?,
            ChatCommands::List => chat_list(&config_dir, owner).await?,
            ChatCommands::History { session } => chat_history(&config_dir, owner, session).await?,
            ChatCommands::Ask { question, session } => {
                chat_ask(&config_dir, owner, session, &question).await?;
            }
            ChatCommands::Rename { session, title } => {
                chat_rename(&config_dir, owner, session, &title).await?;
            }
            ChatCommands::Delete { session } => chat_delete(&config_dir, owner, session).await?,
        },
        Commands::Analytics(command) => match command {
            AnalyticsCommands::Usage { days } => analytics_usage(&config_dir, owner, days).await?,
            AnalyticsCommands::Documents => analytics_documents(&config_dir, owner).await?,
            AnalyticsCommands::Performance => analytics_performance(&config_dir, owner).await?,
        },
        Commands::Serve => serve_mcp(&config_dir, owner).await?,
        Commands::Status => show_status(&config_dir, owner).await?,
        Commands::Maintain { repair } => maintain(&config_dir, repair).await?,
    }

    Ok(())
}
