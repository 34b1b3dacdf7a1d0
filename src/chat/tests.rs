use super::*;
use crate::config::Config;
use crate::database::sqlite::models::NewDocument;
use crate::database::sqlite::queries::{ActivityQueries, DocumentQueries};
use crate::ingest::DocumentIngestor;
use crate::retrieval::InMemoryVectorIndex;
use std::sync::Mutex;
use tempfile::TempDir;

const VOCABULARY: [&str; 4] = ["tomato", "garden", "whale", "ocean"];

#[derive(Debug, Default)]
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingGateway for KeywordEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, CollaboratorError> {
        let lowered = text.to_lowercase();
        let mut vector: Vec<f32> = VOCABULARY
            .iter()
            .map(|word| lowered.matches(word).count() as f32)
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

#[derive(Debug, Default)]
struct OfflineEmbedder;

#[async_trait]
impl EmbeddingGateway for OfflineEmbedder {
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::Embedding("connection refused".to_string()))
    }
}

/// Records every prompt and answers with a fixed reply, or fails when no
/// reply is set
#[derive(Debug, Default)]
struct ScriptedModel {
    reply: Option<String>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedModel {
    fn answering(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::default(),
        }
    }

    fn last_prompt(&self) -> Vec<PromptMessage> {
        self.prompts
            .lock()
            .expect("prompt lock")
            .last()
            .cloned()
            .expect("model was called")
    }

    fn calls(&self) -> usize {
        self.prompts.lock().expect("prompt lock").len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[PromptMessage],
    ) -> std::result::Result<String, CollaboratorError> {
        self.prompts
            .lock()
            .expect("prompt lock")
            .push(messages.to_vec());
        self.reply
            .clone()
            .ok_or_else(|| CollaboratorError::Model("model not loaded".to_string()))
    }
}

struct Fixture {
    _temp_dir: TempDir,
    config: Config,
    database: Database,
    index: Arc<InMemoryVectorIndex>,
}

async fn fixture() -> Fixture {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.chunking.chunk_size = 100;
    config.chunking.overlap = 20;
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("database");

    Fixture {
        _temp_dir: temp_dir,
        config,
        database,
        index: Arc::new(InMemoryVectorIndex::new()),
    }
}

impl Fixture {
    async fn add_document(&self, owner_id: i64, name: &str, text: &str) -> i64 {
        let document = DocumentQueries::create(
            self.database.pool(),
            NewDocument {
                owner_id,
                filename: format!("stored-{}", name),
                original_filename: name.to_string(),
                content: Some(text.to_string()),
                file_path: format!("/uploads/{}", name),
                file_size: text.len() as i64,
                file_type: Some("text/plain".to_string()),
                doc_metadata: None,
            },
        )
        .await
        .expect("document");

        DocumentIngestor::new(
            self.database.clone(),
            Arc::new(KeywordEmbedder),
            Arc::clone(&self.index) as Arc<dyn VectorIndex>,
            &self.config,
        )
        .expect("ingestor")
        .ingest(document.id, owner_id, text)
        .await
        .expect("ingest");

        document.id
    }

    fn service(&self, model: &Arc<ScriptedModel>) -> ChatService {
        self.service_with(Arc::new(KeywordEmbedder), model)
    }

    fn service_with(
        &self,
        embeddings: Arc<dyn EmbeddingGateway>,
        model: &Arc<ScriptedModel>,
    ) -> ChatService {
        ChatService::new(
            self.database.clone(),
            embeddings,
            Arc::clone(&self.index) as Arc<dyn VectorIndex>,
            Arc::clone(model) as Arc<dyn ChatModel>,
            &self.config.chat,
        )
    }
}

#[tokio::test]
async fn answer_cites_documents_and_is_stored() {
    let fixture = fixture().await;
    let garden = fixture
        .add_document(1, "garden.txt", "Tomato plants in the garden need sun.")
        .await;
    let model = Arc::new(ScriptedModel::answering("Give them sun."));
    let chat = fixture.service(&model);
    let session = chat.create_session(1, Some("Plants")).await.expect("session");

    let reply = chat
        .send_message(session.id, 1, "How do I grow a tomato garden?")
        .await
        .expect("reply");

    assert_eq!(reply.message, "Give them sun.");
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].document_id, garden);
    assert_eq!(reply.sources[0].filename, "garden.txt");

    let prompt = model.last_prompt();
    assert_eq!(prompt.len(), 2);
    assert_eq!(prompt[0].role, PromptRole::System);
    assert!(prompt[0].content.contains("Tomato plants in the garden need sun."));
    assert_eq!(prompt[1], PromptMessage::new(PromptRole::User, "How do I grow a tomato garden?"));

    let history = chat.history(session.id, 1).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].role, MessageRole::Assistant);
    let stored: Vec<ChatSource> =
        serde_json::from_str(history[1].sources.as_deref().expect("sources stored"))
            .expect("sources json");
    assert_eq!(stored, reply.sources);

    let activities = ActivityQueries::list_by_action(fixture.database.pool(), 1, ActivityAction::Chat)
        .await
        .expect("activities");
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].resource_id.as_deref(), Some(session.id.to_string().as_str()));
    let details: serde_json::Value =
        serde_json::from_str(activities[0].details.as_deref().expect("details")).expect("json");
    assert_eq!(details["sources_found"], 1);
    assert_eq!(details["message_length"], 30);
}

#[tokio::test]
async fn one_source_per_document() {
    let fixture = fixture().await;
    let text = format!("{} {}", "tomato garden ".repeat(8), "garden tomato ".repeat(8));
    fixture.add_document(1, "long.txt", &text).await;
    let model = Arc::new(ScriptedModel::answering("ok"));
    let chat = fixture.service(&model);
    let session = chat.create_session(1, None).await.expect("session");

    let reply = chat
        .send_message(session.id, 1, "tomato garden")
        .await
        .expect("reply");

    assert_eq!(reply.sources.len(), 1);
    let system = &model.last_prompt()[0].content;
    assert!(system.matches("tomato garden").count() > 1);
}

#[tokio::test]
async fn context_is_limited_to_the_owner() {
    let fixture = fixture().await;
    fixture.add_document(2, "theirs.txt", "whale ocean secrets").await;
    let model = Arc::new(ScriptedModel::answering("I can only answer from your documents."));
    let chat = fixture.service(&model);
    let session = chat.create_session(1, None).await.expect("session");

    let reply = chat
        .send_message(session.id, 1, "tell me about the whale ocean")
        .await
        .expect("reply");

    assert!(reply.sources.is_empty());
    assert!(!model.last_prompt()[0].content.contains("secrets"));

    let history = chat.history(session.id, 1).await.expect("history");
    assert_eq!(history[1].sources, None);
}

#[tokio::test]
async fn earlier_turns_are_sent_as_history() {
    let fixture = fixture().await;
    let model = Arc::new(ScriptedModel::answering("noted"));
    let chat = fixture.service(&model);
    let session = chat.create_session(1, None).await.expect("session");

    chat.send_message(session.id, 1, "first").await.expect("first");
    chat.send_message(session.id, 1, "second").await.expect("second");

    let prompt = model.last_prompt();
    let roles: Vec<PromptRole> = prompt.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [PromptRole::System, PromptRole::User, PromptRole::Assistant, PromptRole::User]
    );
    assert_eq!(prompt[1].content, "first");
    assert_eq!(prompt[2].content, "noted");
    assert_eq!(prompt[3].content, "second");
}

#[tokio::test]
async fn history_is_capped() {
    let mut fixture = fixture().await;
    fixture.config.chat.history_messages = 2;
    let model = Arc::new(ScriptedModel::answering("ok"));
    let chat = fixture.service(&model);
    let session = chat.create_session(1, None).await.expect("session");

    for question in ["one", "two", "three"] {
        chat.send_message(session.id, 1, question).await.expect("reply");
    }

    let prompt = model.last_prompt();
    assert_eq!(prompt.len(), 4);
    assert_eq!(prompt[1].content, "two");
    assert_eq!(prompt[3].content, "three");
}

#[tokio::test]
async fn model_failure_stores_apology() {
    let fixture = fixture().await;
    fixture.add_document(1, "garden.txt", "tomato garden").await;
    let model = Arc::new(ScriptedModel::default());
    let chat = fixture.service(&model);
    let session = chat.create_session(1, None).await.expect("session");

    let reply = chat
        .send_message(session.id, 1, "tomato?")
        .await
        .expect("apology is not an error");

    assert_eq!(reply.message, APOLOGY_MESSAGE);
    assert!(reply.sources.is_empty());

    let history = chat.history(session.id, 1).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, APOLOGY_MESSAGE);
    assert_eq!(history[1].sources, None);

    let activities = ActivityQueries::list_by_action(fixture.database.pool(), 1, ActivityAction::Chat)
        .await
        .expect("activities");
    assert!(activities.is_empty());
}

#[tokio::test]
async fn embedding_outage_answers_without_context() {
    let fixture = fixture().await;
    fixture.add_document(1, "garden.txt", "tomato garden").await;
    let model = Arc::new(ScriptedModel::answering("no context"));
    let chat = fixture.service_with(Arc::new(OfflineEmbedder), &model);
    let session = chat.create_session(1, None).await.expect("session");

    let reply = chat
        .send_message(session.id, 1, "tomato?")
        .await
        .expect("reply");

    assert_eq!(reply.message, "no context");
    assert!(reply.sources.is_empty());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn rejects_empty_messages_and_foreign_sessions() {
    let fixture = fixture().await;
    let model = Arc::new(ScriptedModel::answering("ok"));
    let chat = fixture.service(&model);
    let session = chat.create_session(2, None).await.expect("session");

    assert!(matches!(
        chat.send_message(session.id, 2, "   ").await,
        Err(RagError::Validation(_))
    ));
    assert!(matches!(
        chat.send_message(session.id, 1, "hello").await,
        Err(RagError::NotFound(_))
    ));
    assert!(matches!(
        chat.history(session.id, 1).await,
        Err(RagError::NotFound(_))
    ));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn session_lifecycle() {
    let fixture = fixture().await;
    let model = Arc::new(ScriptedModel::answering("ok"));
    let chat = fixture.service(&model);

    let first = chat.create_session(1, None).await.expect("first");
    assert_eq!(first.title, DEFAULT_SESSION_TITLE);
    let second = chat.create_session(1, Some("  Recipes ")).await.expect("second");
    assert_eq!(second.title, "Recipes");
    chat.create_session(2, None).await.expect("other owner");

    let sessions = chat.list_sessions(1).await.expect("list");
    let ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
    assert_eq!(ids, [second.id, first.id]);

    let renamed = chat.rename_session(first.id, 1, "Garden").await.expect("rename");
    assert_eq!(renamed.title, "Garden");
    assert!(matches!(
        chat.rename_session(first.id, 1, " ").await,
        Err(RagError::Validation(_))
    ));
    assert!(matches!(
        chat.rename_session(first.id, 2, "Mine").await,
        Err(RagError::NotFound(_))
    ));

    chat.send_message(first.id, 1, "hello").await.expect("reply");
    chat.delete_session(first.id, 1).await.expect("delete");
    assert!(matches!(
        chat.history(first.id, 1).await,
        Err(RagError::NotFound(_))
    ));
    assert_eq!(chat.list_sessions(1).await.expect("list").len(), 1);

    let created =
        ActivityQueries::list_by_action(fixture.database.pool(), 1, ActivityAction::CreateSession)
            .await
            .expect("activities");
    assert_eq!(created.len(), 2);
    assert_eq!(
        created[0].details.as_deref(),
        Some(r#"{"title":"New Conversation"}"#)
    );
}

#[test]
fn prompt_layout() {
    let prompt = build_prompt(
        &["alpha".to_string(), "beta".to_string()],
        &[],
        "question",
    );

    assert_eq!(prompt.len(), 2);
    assert!(prompt[0].content.starts_with("You are a helpful AI assistant"));
    assert!(prompt[0].content.contains("Context from documents:\nalpha\n\nbeta\n\nInstructions:"));
    assert_eq!(prompt[1], PromptMessage::new(PromptRole::User, "question"));
}

#[test]
fn prompt_roles_serialize_lowercase() {
    let json = serde_json::to_value(PromptMessage::new(PromptRole::System, "x")).expect("json");
    assert_eq!(json["role"], "system");
    assert_eq!(PromptRole::from(MessageRole::Assistant), PromptRole::Assistant);
}
