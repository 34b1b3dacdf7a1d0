use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::analytics::{Analytics, display_file_type};
use crate::chat::ChatService;
use crate::config::Config;
use crate::database::lancedb::VectorStore;
use crate::database::lancedb::vector_store::MIN_ROWS_FOR_VECTOR_INDEX;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::Document;
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries};
use crate::embeddings::ollama::OllamaClient;
use crate::ingest::DocumentIngestor;
use crate::mcp::{McpServer, ToolServices, register_tools};
use crate::retrieval::{
    EmbeddingGateway, FileCategory, HybridRetriever, SearchFilter, SearchMode, SearchRequest,
    SimilarityExpander, VectorIndex,
};

/// Options of the `search` command
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub mode: SearchMode,
    pub category: Option<FileCategory>,
    pub from: Option<chrono::NaiveDate>,
    pub to: Option<chrono::NaiveDate>,
}

/// Every service the commands use, wired to the configured stores
pub struct AppContext {
    pub config: Config,
    pub database: Database,
    pub vector_store: Arc<VectorStore>,
    pub ollama: Arc<OllamaClient>,
    pub ingestor: Arc<DocumentIngestor>,
    pub retriever: Arc<HybridRetriever>,
    pub expander: Arc<SimilarityExpander>,
    pub chat: Arc<ChatService>,
    pub analytics: Analytics,
}

impl AppContext {
    #[inline]
    pub async fn open(config_dir: &Path) -> Result<Self> {
        let config = Config::load(config_dir).context("Failed to load configuration")?;

        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .context("Failed to initialize database")?;
        let vector_store = Arc::new(
            VectorStore::new(&config)
                .await
                .context("Failed to initialize vector store")?,
        );
        let ollama = Arc::new(OllamaClient::new(&config).context("Failed to create Ollama client")?);

        let embeddings: Arc<dyn EmbeddingGateway> = Arc::clone(&ollama) as Arc<dyn EmbeddingGateway>;
        let index: Arc<dyn VectorIndex> = Arc::clone(&vector_store) as Arc<dyn VectorIndex>;

        let ingestor = Arc::new(DocumentIngestor::new(
            database.clone(),
            Arc::clone(&embeddings),
            Arc::clone(&index),
            &config,
        )?);
        let retriever = Arc::new(
            HybridRetriever::new(database.clone(), Arc::clone(&embeddings), Arc::clone(&index))
                .with_snippet_length(config.retrieval.snippet_length),
        );
        let expander = Arc::new(SimilarityExpander::new(database.clone(), Arc::clone(&index)));
        let chat = Arc::new(ChatService::new(
            database.clone(),
            embeddings,
            index,
            Arc::clone(&ollama) as Arc<dyn crate::chat::ChatModel>,
            &config.chat,
        ));
        let analytics = Analytics::new(database.clone());

        Ok(Self {
            config,
            database,
            vector_store,
            ollama,
            ingestor,
            retriever,
            expander,
            chat,
            analytics,
        })
    }

    #[inline]
    pub fn tool_services(&self, owner_id: i64) -> ToolServices {
        ToolServices {
            owner_id,
            default_search_limit: self.config.retrieval.default_limit,
            retriever: Arc::clone(&self.retriever),
            expander: Arc::clone(&self.expander),
            ingestor: Arc::clone(&self.ingestor),
            chat: Arc::clone(&self.chat),
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn print_document_line(document: &Document) {
    println!(
        "📄 {} (ID: {})",
        style(&document.original_filename).bold(),
        document.id
    );
    println!(
        "   Type: {}  Size: {} bytes  Uploaded: {}",
        display_file_type(document.file_type.as_deref()),
        document.file_size,
        document.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

/// Upload, extract and index a file
#[inline]
pub async fn add_document(config_dir: &Path, owner_id: i64, path: &Path) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    info!("Adding document {}", path.display());

    let bar = spinner(format!("Indexing {}", path.display()));
    let result = app.ingestor.ingest_file(path, owner_id).await;
    bar.finish_and_clear();

    let report = result.with_context(|| format!("Failed to add {}", path.display()))?;
    println!(
        "{} {} (ID: {})",
        style("✓ Added").green(),
        report.document.original_filename,
        report.document.id
    );
    println!("  Chunks indexed: {}", report.chunks);
    if report.chunks == 0 {
        println!(
            "  {}",
            style("No text could be extracted, the document is stored but not searchable").yellow()
        );
    }
    Ok(())
}

#[inline]
pub async fn list_documents(
    config_dir: &Path,
    owner_id: i64,
    search: Option<&str>,
    skip: i64,
    limit: i64,
) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let documents = app
        .ingestor
        .list_documents(owner_id, skip, limit, search)
        .await?;

    if documents.is_empty() {
        println!("No documents found.");
        println!("Use 'knowledge-rag add <file>' to add one.");
        return Ok(());
    }

    let total = DocumentQueries::count_by_owner(app.database.pool(), owner_id).await?;
    println!("Documents ({} shown, {} total):", documents.len(), total);
    println!();
    for document in &documents {
        print_document_line(document);
    }
    Ok(())
}

#[inline]
pub async fn show_document(config_dir: &Path, owner_id: i64, document_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let document = app.ingestor.get_document(document_id, owner_id).await?;
    let chunks = ChunkQueries::list_by_document(app.database.pool(), document_id).await?;
    let embedded = chunks.iter().filter(|chunk| chunk.embedding.is_some()).count();

    print_document_line(&document);
    println!("   Stored at: {}", document.file_path);
    println!("   Chunks: {} ({} embedded)", chunks.len(), embedded);
    if let Some(metadata) = &document.doc_metadata {
        println!("   Metadata: {}", metadata);
    }

    let text = document.text();
    if !text.is_empty() {
        println!();
        println!("{}", crate::retrieval::truncate_snippet(text, 500));
    }
    Ok(())
}

#[inline]
pub async fn delete_document(config_dir: &Path, owner_id: i64, document_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let document = app.ingestor.get_document(document_id, owner_id).await?;
    app.ingestor.delete_document(document_id, owner_id).await?;
    println!(
        "{} {} (ID: {})",
        style("✓ Deleted").green(),
        document.original_filename,
        document.id
    );
    Ok(())
}

#[inline]
pub async fn search_documents(
    config_dir: &Path,
    owner_id: i64,
    query: &str,
    options: SearchOptions,
) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let request = SearchRequest::new(query)
        .with_limit(options.limit.unwrap_or(app.config.retrieval.default_limit))
        .with_mode(options.mode)
        .with_filter(
            SearchFilter::default()
                .with_category(options.category)
                .with_date_range(options.from, options.to),
        );

    let results = app.retriever.search(owner_id, &request).await?;
    if results.is_empty() {
        println!("No results for '{}'.", query);
        return Ok(());
    }

    println!("Results for '{}' ({} search):", query, options.mode);
    println!();
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} (ID: {})  score {:.3}",
            rank + 1,
            style(&result.filename).bold(),
            result.document_id,
            result.relevance_score
        );
        println!("   {}", style(&result.snippet).dim());
    }
    Ok(())
}

#[inline]
pub async fn similar_documents(
    config_dir: &Path,
    owner_id: i64,
    document_id: i64,
    limit: usize,
) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let results = app
        .expander
        .find_similar(document_id, limit, owner_id)
        .await?;

    if results.is_empty() {
        println!("No similar documents found.");
        return Ok(());
    }

    for result in &results {
        println!(
            "📄 {} (ID: {})  score {:.3}",
            style(&result.filename).bold(),
            result.document_id,
            result.relevance_score
        );
        println!("   {}", style(&result.snippet).dim());
    }
    Ok(())
}

#[inline]
pub async fn chat_new(config_dir: &Path, owner_id: i64, title: Option<&str>) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let session = app.chat.create_session(owner_id, title).await?;
    println!(
        "{} {} (ID: {})",
        style("✓ Created session").green(),
        session.title,
        session.id
    );
    Ok(())
}

#[inline]
pub async fn chat_list(config_dir: &Path, owner_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let sessions = app.chat.list_sessions(owner_id).await?;
    if sessions.is_empty() {
        println!("No chat sessions yet. Use 'knowledge-rag chat new' to start one.");
        return Ok(());
    }

    for session in &sessions {
        println!(
            "💬 {} (ID: {})  created {}",
            style(&session.title).bold(),
            session.id,
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[inline]
pub async fn chat_history(config_dir: &Path, owner_id: i64, session_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let messages = app.chat.history(session_id, owner_id).await?;
    if messages.is_empty() {
        println!("No messages in this session yet.");
        return Ok(());
    }

    for message in &messages {
        println!(
            "{} [{}]",
            style(message.role).bold().cyan(),
            message.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}", message.content);
        println!();
    }
    Ok(())
}

#[inline]
pub async fn chat_ask(
    config_dir: &Path,
    owner_id: i64,
    session_id: Option<i64>,
    question: &str,
) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let session_id = match session_id {
        Some(session_id) => session_id,
        None => {
            let session = app.chat.create_session(owner_id, None).await?;
            eprintln!("Started session {}", session.id);
            session.id
        }
    };

    let bar = spinner("Thinking".to_string());
    let reply = app.chat.send_message(session_id, owner_id, question).await;
    bar.finish_and_clear();
    let reply = reply?;

    println!("{}", reply.message);
    if !reply.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").bold().yellow());
        for source in &reply.sources {
            println!(
                "  • {} (ID: {}, relevance {:.3})",
                source.filename, source.document_id, source.relevance_score
            );
        }
    }
    Ok(())
}

#[inline]
pub async fn chat_rename(config_dir: &Path, owner_id: i64, session_id: i64, title: &str) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let session = app.chat.rename_session(session_id, owner_id, title).await?;
    println!("{} {}", style("✓ Renamed to").green(), session.title);
    Ok(())
}

#[inline]
pub async fn chat_delete(config_dir: &Path, owner_id: i64, session_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    app.chat.delete_session(session_id, owner_id).await?;
    println!("{} session {}", style("✓ Deleted").green(), session_id);
    Ok(())
}

#[inline]
pub async fn analytics_usage(config_dir: &Path, owner_id: i64, days: u32) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let report = app.analytics.usage(owner_id, days).await?;

    println!("{}", style(format!("📊 Usage (last {} days)", report.days)).bold().cyan());
    println!("   Documents: {}", report.total_documents);
    println!("   Searches: {}", report.total_searches);
    println!("   Chat sessions: {}", report.total_chat_sessions);
    println!();
    println!("{}", style("Recent activity:").bold().yellow());
    for activity in &report.recent_activities {
        println!(
            "   {}  {}  {}",
            activity.timestamp.format("%Y-%m-%d %H:%M:%S"),
            activity.action,
            activity.details
        );
    }
    Ok(())
}

#[inline]
pub async fn analytics_documents(config_dir: &Path, owner_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let report = app.analytics.documents(owner_id).await?;

    println!("{}", style("📚 Documents").bold().cyan());
    println!("   Total: {}", report.total_documents);
    for (display_type, count) in &report.documents_by_type {
        println!("   {}: {}", display_type, count);
    }
    println!();
    println!("{}", style("Recent uploads:").bold().yellow());
    for upload in &report.recent_uploads {
        println!(
            "   {} (ID: {})  {}  {} bytes  {}",
            upload.filename,
            upload.id,
            upload.file_type,
            upload.file_size,
            upload.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[inline]
pub async fn analytics_performance(config_dir: &Path, owner_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;
    let performance = app.analytics.search_performance(owner_id).await?;

    println!("{}", style("🔍 Search performance").bold().cyan());
    println!(
        "   Average results per search: {:.2}",
        performance.average_results_per_search
    );
    println!();
    println!("{}", style("Popular searches:").bold().yellow());
    for search in &performance.popular_searches {
        println!("   {} ({})", search.query, search.count);
    }
    Ok(())
}

/// Show connectivity of every store and a summary of the owner's data
#[inline]
pub async fn show_status(config_dir: &Path, owner_id: i64) -> Result<()> {
    let config = Config::load(config_dir).unwrap_or_else(|e| {
        warn!("Using default configuration: {:#}", e);
        Config::with_base_dir(config_dir)
    });

    println!("📊 Knowledge RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Database Status:");
    let database = match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {}", e);
            None
        }
    };

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding model: {}", config.ollama.model);
                println!("   💬 Chat model: {}", config.chat.model);
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Connected but unhealthy - {:#}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Failed to connect - {:#}", e);
        }
    }

    println!("🔍 Vector Database Status:");
    let vector_store = match VectorStore::new(&config).await {
        Ok(store) => {
            println!("   ✅ LanceDB: Connected");
            Some(store)
        }
        Err(e) => {
            println!("   ❌ LanceDB: Failed to connect - {}", e);
            println!("   Run 'knowledge-rag maintain --repair' to rebuild it");
            None
        }
    };

    if let Some(database) = database {
        println!();
        println!("📚 Owner {} Overview:", owner_id);
        let documents = DocumentQueries::count_by_owner(database.pool(), owner_id).await?;
        let chunks = ChunkQueries::count_for_owner(database.pool(), owner_id).await?;
        println!("   📄 Documents: {}", documents);
        println!("   🧩 Chunks: {}", chunks);

        if let Some(store) = vector_store {
            match store.count_embeddings().await {
                Ok(count) => println!("   🧮 Vectors (all owners): {}", count),
                Err(e) => println!("   ❌ Failed to count vectors: {}", e),
            }
            if !store.validate_integrity().await {
                println!("   ⚠️  Vector table failed its integrity check");
                println!("   Run 'knowledge-rag maintain --repair' to rebuild it");
            }
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'knowledge-rag add <file>' to index a document");
    println!("   • Use 'knowledge-rag search <query>' to search your documents");
    println!("   • Use 'knowledge-rag serve' to start the MCP server for AI assistants");

    Ok(())
}

/// Start the MCP server on stdio. Everything user-facing goes to stderr so
/// stdout carries only protocol messages.
#[inline]
pub async fn serve_mcp(config_dir: &Path, owner_id: i64) -> Result<()> {
    let app = AppContext::open(config_dir).await?;

    let ollama = Arc::clone(&app.ollama);
    match tokio::task::spawn_blocking(move || ollama.health_check()).await {
        Ok(Ok(())) => info!("Ollama is healthy"),
        Ok(Err(e)) => {
            warn!("Ollama is reachable but unhealthy: {:#}", e);
            eprintln!(
                "{}",
                style("Warning: Ollama may not be ready. Semantic search and chat will degrade.")
                    .yellow()
            );
        }
        Err(e) => error!("Ollama health check did not complete: {}", e),
    }

    let server = Arc::new(McpServer::new("knowledge-rag", env!("CARGO_PKG_VERSION")));
    register_tools(&server, &app.tool_services(owner_id)).await;

    eprintln!(
        "✅ MCP server initialized with tools: {}",
        server.tool_names().await.join(", ")
    );
    eprintln!("🌐 Serving owner {} on stdio. Press Ctrl+C to stop.", owner_id);

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            result.context("MCP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n📴 Received interrupt signal, shutting down...");
        }
    }

    eprintln!("✅ Shutdown complete");
    Ok(())
}

/// Compact both stores and build the ANN index once there are enough
/// vectors. With `repair`, the vector table is recreated first and refilled
/// from the embeddings kept in SQLite.
#[inline]
pub async fn maintain(config_dir: &Path, repair: bool) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?;

    let vector_path = config.vector_database_path();
    let dimension = config.ollama.embedding_dimension as usize;
    let vector_store = if repair {
        let progress = spinner("Rebuilding vector table".to_string());
        let store = Arc::new(
            VectorStore::recreate(&vector_path, dimension)
                .await
                .context("Failed to recreate vector table")?,
        );
        let ollama = Arc::new(OllamaClient::new(&config).context("Failed to create Ollama client")?);
        let ingestor = DocumentIngestor::new(
            database.clone(),
            ollama as Arc<dyn EmbeddingGateway>,
            Arc::clone(&store) as Arc<dyn VectorIndex>,
            &config,
        )?;
        let restored = ingestor.reindex_stored_embeddings().await;
        progress.finish_and_clear();
        println!("🔧 Restored {} vectors from stored embeddings", restored?);
        store
    } else {
        Arc::new(
            VectorStore::new(&config)
                .await
                .context("Failed to initialize vector store")?,
        )
    };

    let progress = spinner("Optimizing databases".to_string());
    let optimized = async {
        database.optimize().await?;
        vector_store.optimize().await?;
        anyhow::Ok(())
    }
    .await;
    progress.finish_and_clear();
    optimized?;
    println!("✅ SQLite and LanceDB optimized");

    let vectors = vector_store.count_embeddings().await?;
    if vectors >= MIN_ROWS_FOR_VECTOR_INDEX {
        match vector_store.create_vector_index().await {
            Ok(()) => println!("✅ Vector index built over {} vectors", vectors),
            Err(e) => {
                warn!("Failed to build vector index: {}", e);
                println!("⚠️  Vector index not built: {}", e);
            }
        }
    } else {
        info!(
            "Skipping vector index, {} of {} rows needed",
            vectors, MIN_ROWS_FOR_VECTOR_INDEX
        );
    }

    Ok(())
}
