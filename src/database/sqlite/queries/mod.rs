
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

/// Restrictions applied by the lexical document scan
#[derive(Debug, Clone, Default)]
pub struct DocumentTextFilter<'a> {
    /// Allowed MIME types; empty means any
    pub mime_types: &'a [&'a str],
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FileTypeCount {
    pub file_type: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct QueryFrequency {
    pub query: String,
    pub count: i64,
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO documents (owner_id, filename, original_filename, content, file_path, file_size, file_type, doc_metadata, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_document.owner_id)
        .bind(new_document.filename)
        .bind(new_document.original_filename)
        .bind(new_document.content)
        .bind(new_document.file_path)
        .bind(new_document.file_size)
        .bind(new_document.file_type)
        .bind(new_document.doc_metadata)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Document>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("Failed to get document by id")
    }

    /// Fetch a document only when `owner_id` owns it
    #[inline]
    pub async fn get_owned(
        pool: &SqlitePool,
        id: i64,
        owner_id: i64,
    ) -> Result<Option<Document>> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get owned document")
    }

    /// Newest first, optionally restricted to display names containing `name_contains`
    #[inline]
    pub async fn list_by_owner(
        pool: &SqlitePool,
        owner_id: i64,
        name_contains: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM documents WHERE owner_id = ");
        builder.push_bind(owner_id);
        if let Some(name) = name_contains {
            builder.push(" AND instr(original_filename, ");
            builder.push_bind(name.to_string());
            builder.push(") > 0");
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(skip);

        builder
            .build_query_as::<Document>()
            .fetch_all(pool)
            .await
            .context("Failed to list documents")
    }

    #[inline]
    pub async fn count_by_owner(pool: &SqlitePool, owner_id: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(pool)
            .await
            .context("Failed to count documents")
    }

    /// Case-sensitive containment of `query` in the display name or the
    /// extracted text, newest first.
    #[inline]
    pub async fn search_text(
        pool: &SqlitePool,
        owner_id: i64,
        query: &str,
        filter: &DocumentTextFilter<'_>,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM documents WHERE owner_id = ");
        builder.push_bind(owner_id);
        builder.push(" AND (instr(original_filename, ");
        builder.push_bind(query.to_string());
        builder.push(") > 0 OR instr(COALESCE(content, ''), ");
        builder.push_bind(query.to_string());
        builder.push(") > 0)");

        if !filter.mime_types.is_empty() {
            builder.push(" AND file_type IN (");
            let mut separated = builder.separated(", ");
            for mime_type in filter.mime_types {
                separated.push_bind(mime_type.to_string());
            }
            separated.push_unseparated(")");
        }
        if let Some(from) = filter.created_from {
            builder.push(" AND created_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filter.created_to {
            builder.push(" AND created_at <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(limit);

        let documents = builder
            .build_query_as::<Document>()
            .fetch_all(pool)
            .await
            .context("Failed to search document text")?;
        debug!("Lexical scan for '{}' matched {} documents", query, documents.len());
        Ok(documents)
    }

    #[inline]
    pub async fn count_by_file_type(pool: &SqlitePool, owner_id: i64) -> Result<Vec<FileTypeCount>> {
        sqlx::query_as::<_, FileTypeCount>(
            "SELECT file_type, COUNT(id) AS count FROM documents WHERE owner_id = ? GROUP BY file_type ORDER BY file_type",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to count documents by file type")
    }

    /// Returns whether a row was deleted; chunks cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Insert chunk rows on an open connection, typically a transaction
    #[inline]
    pub async fn insert(
        connection: &mut SqliteConnection,
        new_chunk: &NewDocumentChunk,
    ) -> Result<DocumentChunk> {
        let id = sqlx::query(
            "INSERT INTO document_chunks (document_id, content, embedding, position) VALUES (?, ?, ?, ?)",
        )
        .bind(new_chunk.document_id)
        .bind(&new_chunk.content)
        .bind(&new_chunk.embedding)
        .bind(new_chunk.position)
        .execute(&mut *connection)
        .await
        .with_context(|| {
            format!(
                "Failed to insert chunk {} of document {}",
                new_chunk.position, new_chunk.document_id
            )
        })?
        .last_insert_rowid();

        Ok(DocumentChunk {
            id,
            document_id: new_chunk.document_id,
            content: new_chunk.content.clone(),
            embedding: new_chunk.embedding.clone(),
            position: new_chunk.position,
        })
    }

    #[inline]
    pub async fn delete_for_document(connection: &mut SqliteConnection, document_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(connection)
            .await
            .context("Failed to delete document chunks")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>(
            "SELECT * FROM document_chunks WHERE document_id = ? ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list document chunks")
    }

    /// The first `limit` chunks by position that carry an embedding
    #[inline]
    pub async fn first_embedded(
        pool: &SqlitePool,
        document_id: i64,
        limit: i64,
    ) -> Result<Vec<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>(
            "SELECT * FROM document_chunks WHERE document_id = ? AND embedding IS NOT NULL ORDER BY position LIMIT ?",
        )
        .bind(document_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to get embedded chunks")
    }

    #[inline]
    pub async fn ids_for_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar("SELECT id FROM document_chunks WHERE document_id = ? ORDER BY position")
            .bind(document_id)
            .fetch_all(pool)
            .await
            .context("Failed to list chunk ids")
    }

    /// Resolve a chunk id to the chunk and its owning document
    #[inline]
    pub async fn get_with_document<'e, E>(executor: E, chunk_id: i64) -> Result<Option<ChunkWithDocument>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChunkWithDocument>(
            r#"
            SELECT d.*,
                   c.id AS chunk_id,
                   c.content AS chunk_content,
                   c.position AS position
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(executor)
        .await
        .context("Failed to resolve chunk")
    }

    /// Every chunk that carries an embedding, across owners, by chunk id
    #[inline]
    pub async fn list_stored_embeddings(pool: &SqlitePool) -> Result<Vec<StoredEmbedding>> {
        sqlx::query_as::<_, StoredEmbedding>(
            r#"
            SELECT c.id AS chunk_id,
                   c.document_id,
                   d.owner_id,
                   c.position,
                   c.embedding
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.embedding IS NOT NULL
            ORDER BY c.id
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list stored embeddings")
    }

    #[inline]
    pub async fn count_for_owner(pool: &SqlitePool, owner_id: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_chunks c JOIN documents d ON d.id = c.document_id WHERE d.owner_id = ?",
        )
        .bind(owner_id)
        .fetch_one(pool)
        .await
        .context("Failed to count chunks")
    }
}

pub struct SearchQueryQueries;

impl SearchQueryQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, owner_id: i64, query: &str) -> Result<SearchQueryRecord> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO search_queries (owner_id, query, results_count, timestamp) VALUES (?, ?, 0, ?)",
        )
        .bind(owner_id)
        .bind(query)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to log search query")?
        .last_insert_rowid();

        Ok(SearchQueryRecord {
            id,
            owner_id,
            query: query.to_string(),
            results_count: 0,
            timestamp: now,
        })
    }

    #[inline]
    pub async fn set_results_count(pool: &SqlitePool, id: i64, results_count: i64) -> Result<()> {
        sqlx::query("UPDATE search_queries SET results_count = ? WHERE id = ?")
            .bind(results_count)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update search results count")?;
        Ok(())
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<SearchQueryRecord>> {
        sqlx::query_as::<_, SearchQueryRecord>("SELECT * FROM search_queries WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get search query")
    }

    #[inline]
    pub async fn count_since(pool: &SqlitePool, owner_id: i64, since: NaiveDateTime) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM search_queries WHERE owner_id = ? AND timestamp >= ?")
            .bind(owner_id)
            .bind(since)
            .fetch_one(pool)
            .await
            .context("Failed to count searches")
    }

    /// Mean result count over searches that found something
    #[inline]
    pub async fn average_results(pool: &SqlitePool, owner_id: i64) -> Result<Option<f64>> {
        sqlx::query_scalar(
            "SELECT AVG(results_count) FROM search_queries WHERE owner_id = ? AND results_count > 0",
        )
        .bind(owner_id)
        .fetch_one(pool)
        .await
        .context("Failed to average search results")
    }

    #[inline]
    pub async fn most_frequent(pool: &SqlitePool, owner_id: i64, limit: i64) -> Result<Vec<QueryFrequency>> {
        sqlx::query_as::<_, QueryFrequency>(
            r#"
            SELECT query, COUNT(id) AS count
            FROM search_queries
            WHERE owner_id = ?
            GROUP BY query
            ORDER BY count DESC, MAX(timestamp) DESC
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to get popular searches")
    }
}

pub struct ActivityQueries;

impl ActivityQueries {
    #[inline]
    pub async fn record(pool: &SqlitePool, activity: NewUserActivity) -> Result<i64> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO user_activities (owner_id, action, resource_id, details, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(activity.owner_id)
        .bind(activity.action.as_str())
        .bind(activity.resource_id)
        .bind(activity.details)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to record {} activity", activity.action))?
        .last_insert_rowid();

        Ok(id)
    }

    /// Newest first
    #[inline]
    pub async fn recent_since(
        pool: &SqlitePool,
        owner_id: i64,
        since: NaiveDateTime,
        limit: i64,
    ) -> Result<Vec<UserActivity>> {
        sqlx::query_as::<_, UserActivity>(
            "SELECT * FROM user_activities WHERE owner_id = ? AND timestamp >= ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list recent activities")
    }

    #[inline]
    pub async fn list_by_action(
        pool: &SqlitePool,
        owner_id: i64,
        action: ActivityAction,
    ) -> Result<Vec<UserActivity>> {
        sqlx::query_as::<_, UserActivity>(
            "SELECT * FROM user_activities WHERE owner_id = ? AND action = ? ORDER BY id",
        )
        .bind(owner_id)
        .bind(action.as_str())
        .fetch_all(pool)
        .await
        .context("Failed to list activities")
    }
}

pub struct ChatSessionQueries;

impl ChatSessionQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, owner_id: i64, title: &str) -> Result<ChatSession> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query("INSERT INTO chat_sessions (owner_id, title, created_at) VALUES (?, ?, ?)")
            .bind(owner_id)
            .bind(title)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create chat session")?
            .last_insert_rowid();

        Ok(ChatSession {
            id,
            owner_id,
            title: title.to_string(),
            created_at: now,
        })
    }

    #[inline]
    pub async fn get_owned(pool: &SqlitePool, id: i64, owner_id: i64) -> Result<Option<ChatSession>> {
        sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get chat session")
    }

    /// Newest first
    #[inline]
    pub async fn list_by_owner(pool: &SqlitePool, owner_id: i64) -> Result<Vec<ChatSession>> {
        sqlx::query_as::<_, ChatSession>(
            "SELECT * FROM chat_sessions WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat sessions")
    }

    #[inline]
    pub async fn count_since(pool: &SqlitePool, owner_id: i64, since: NaiveDateTime) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE owner_id = ? AND created_at >= ?")
            .bind(owner_id)
            .bind(since)
            .fetch_one(pool)
            .await
            .context("Failed to count chat sessions")
    }

    #[inline]
    pub async fn rename(pool: &SqlitePool, id: i64, title: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to rename chat session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Messages cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete chat session")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct ChatMessageQueries;

impl ChatMessageQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_message: NewChatMessage) -> Result<ChatMessage> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, sources, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_message.session_id)
        .bind(new_message.role)
        .bind(&new_message.content)
        .bind(&new_message.sources)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to store chat message")?
        .last_insert_rowid();

        Ok(ChatMessage {
            id,
            session_id: new_message.session_id,
            role: new_message.role,
            content: new_message.content,
            sources: new_message.sources,
            timestamp: now,
        })
    }

    /// Oldest first
    #[inline]
    pub async fn list_by_session(pool: &SqlitePool, session_id: i64) -> Result<Vec<ChatMessage>> {
        sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY timestamp, id",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chat messages")
    }

    /// The `limit` most recent messages before `before_id`, oldest first
    #[inline]
    pub async fn recent_before(
        pool: &SqlitePool,
        session_id: i64,
        before_id: i64,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM chat_messages WHERE session_id = ? AND id < ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to get chat history")?;

        messages.reverse();
        Ok(messages)
    }
}
