//! Application wiring: opens every store and provider named by the
//! configuration and runs chat turns against them.
//!
//! The CLI and the HTTP server both go through [`App`], so a question asked
//! from either surface follows the same sanitize → answer → persist path.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::conversations::ConversationStore;
use crate::db;
use crate::dense::{DenseIndex, SqliteDenseIndex};
use crate::embedding::{create_embedder, Embedder};
use crate::error::QaError;
use crate::ingest::DocumentService;
use crate::lexical::LexicalIndex;
use crate::llm::{create_generator, Generator};
use crate::models::{HistoryTurn, Role};
use crate::qa::{Answer, QaPipeline};
use crate::registry::DocumentRegistry;
use crate::retriever::HybridRetriever;
use crate::safety::Sanitizer;

/// Result of one question, with the conversation it was recorded in (if any).
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub answer: Answer,
}

pub struct App {
    config: Config,
    documents: DocumentService,
    conversations: ConversationStore,
    pipeline: QaPipeline,
    sanitizer: Sanitizer,
}

impl App {
    /// Open the SQLite stores under the configured paths and build the
    /// configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.llm)?;

        let dense_pool = db::connect(&config.paths.index_db()).await?;
        let dense: Arc<dyn DenseIndex> = Arc::new(SqliteDenseIndex::new(dense_pool).await?);
        let registry = DocumentRegistry::open(&config.paths.registry_db()).await?;
        let conversations = ConversationStore::open(&config.paths.conversations_db()).await?;

        Ok(Self::from_parts(
            config.clone(),
            embedder,
            generator,
            dense,
            registry,
            conversations,
        ))
    }

    /// Assemble an app from already-constructed parts.
    pub fn from_parts(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        dense: Arc<dyn DenseIndex>,
        registry: DocumentRegistry,
        conversations: ConversationStore,
    ) -> Self {
        let lexical = Arc::new(LexicalIndex::new(dense.clone()));
        let retriever = Arc::new(HybridRetriever::new(
            embedder.clone(),
            dense.clone(),
            lexical.clone(),
            config.retrieval.lexical_weight,
        ));
        let pipeline = QaPipeline::new(retriever, generator, config.history.clone());
        let documents = DocumentService::new(
            config.paths.uploads_dir(),
            config.chunking.clone(),
            embedder,
            dense,
            lexical,
            registry,
        );
        let sanitizer = Sanitizer::new(config.safety.max_input_length);

        Self {
            config,
            documents,
            conversations,
            pipeline,
            sanitizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn pipeline(&self) -> &QaPipeline {
        &self.pipeline
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    fn top_k(&self, top_k: Option<usize>) -> usize {
        top_k.filter(|k| *k > 0).unwrap_or(self.config.retrieval.top_k)
    }

    /// Answer a standalone question. Nothing is persisted.
    pub async fn ask(&self, raw_question: &str, top_k: Option<usize>) -> Result<Answer, QaError> {
        let question = self.sanitizer.sanitize(raw_question)?;
        self.pipeline.answer(&question, self.top_k(top_k), &[]).await
    }

    /// One chat turn in `conversation_id`.
    ///
    /// A refused question returns [`QaError::InvalidInput`] and stores
    /// nothing. Otherwise the user message is stored before answering and
    /// the assistant message, with its cited sources, after.
    pub async fn chat(
        &self,
        conversation_id: &str,
        raw_question: &str,
        top_k: Option<usize>,
    ) -> Result<Answer, QaError> {
        let question = self.sanitizer.sanitize(raw_question)?;

        if self.conversations.get(conversation_id).await?.is_none() {
            return Err(QaError::NotFound(format!(
                "Conversation not found: {}",
                conversation_id
            )));
        }

        let history: Vec<HistoryTurn> = self
            .conversations
            .list_messages(conversation_id)
            .await?
            .iter()
            .map(|m| m.as_turn())
            .collect();

        self.conversations
            .add_message(conversation_id, Role::User, &question, &[])
            .await?;

        let answer = self
            .pipeline
            .answer(&question, self.top_k(top_k), &history)
            .await?;

        self.conversations
            .add_message(conversation_id, Role::Assistant, &answer.answer, &answer.sources)
            .await?;

        tracing::info!(
            conversation_id,
            outcome = answer.outcome.as_str(),
            sources = answer.sources.len(),
            "chat turn complete"
        );
        Ok(answer)
    }

    /// Route a question to [`App::chat`] when a conversation is given,
    /// otherwise to [`App::ask`].
    pub async fn respond(
        &self,
        conversation_id: Option<&str>,
        raw_question: &str,
        top_k: Option<usize>,
    ) -> Result<ChatTurn, QaError> {
        let answer = match conversation_id {
            Some(id) => self.chat(id, raw_question, top_k).await?,
            None => self.ask(raw_question, top_k).await?,
        };
        Ok(ChatTurn {
            conversation_id: conversation_id.map(str::to_string),
            answer,
        })
    }
}

// ============ CLI ============

pub async fn run_ask(
    config: &Config,
    question: &str,
    conversation: Option<&str>,
    top_k: Option<usize>,
) -> Result<()> {
    let app = App::open(config).await?;
    let turn = match app.respond(conversation, question, top_k).await {
        Ok(turn) => turn,
        Err(QaError::InvalidInput(reason)) => {
            println!("Refused: {}", reason);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", turn.answer.answer);
    if !turn.answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in turn.answer.sources.iter().enumerate() {
            let name = source
                .original_name
                .as_deref()
                .or(source.source_path.as_deref())
                .unwrap_or("?");
            match source.chunk_index {
                Some(idx) => println!("  {}. {} (chunk {})", i + 1, name, idx),
                None => println!("  {}. {}", i + 1, name),
            }
        }
    }
    Ok(())
}

pub fn run_sanitize(config: &Config, text: &str) -> Result<()> {
    let sanitizer = Sanitizer::new(config.safety.max_input_length);
    match sanitizer.check(Some(text)) {
        (Some(cleaned), _) => println!("{}", cleaned),
        (None, reason) => println!("Refused: {}", reason.unwrap_or_default()),
    }
    Ok(())
}
