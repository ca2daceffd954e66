//! Citation-gated question answering.
//!
//! One call to [`QaPipeline::answer`] runs: history summary → question
//! rewrite → hybrid retrieval → numbered-context prompt → generation →
//! citation check. An answer without any `[n]` marker is replaced by a
//! fixed refusal; otherwise the cited passages' sources are attached.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::HistoryConfig;
use crate::error::QaError;
use crate::history;
use crate::llm::{ChatMessage, Generator};
use crate::models::{Hit, HistoryTurn, SourceCitation};
use crate::retriever::HybridRetriever;

pub const EMPTY_QUERY_ANSWER: &str = "La requête est vide.";
pub const NO_DOCUMENTS_ANSWER: &str = "Aucun document disponible pour répondre à la question.";
pub const CITATION_MISSING_ANSWER: &str =
    "Je ne peux répondre que sur la base des documents disponibles et aucune citation n'a été fournie.";

const SYSTEM_INSTRUCTION: &str = "You are a legal assistant. Use the conversation summary and the retrieved context to answer. If the answer is not in the provided documents, say you cannot answer from the available documents. Keep responses concise and cite sources using [index] matching the context blocks.";

static CITATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered,
    EmptyQuery,
    NoDocuments,
    CitationMissing,
}

impl AnswerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerOutcome::Answered => "answered",
            AnswerOutcome::EmptyQuery => "empty_query",
            AnswerOutcome::NoDocuments => "no_documents",
            AnswerOutcome::CitationMissing => "citation_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub outcome: AnswerOutcome,
}

impl Answer {
    fn refusal(text: &str, outcome: AnswerOutcome) -> Self {
        Self {
            answer: text.to_string(),
            sources: Vec::new(),
            outcome,
        }
    }
}

/// `[1] text`, `[2] text`, ... separated by blank lines.
pub fn format_context(hits: &[Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i + 1, hit.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn has_citation(text: &str) -> bool {
    CITATION_RE.is_match(text)
}

fn dedup_by_identity(citations: impl IntoIterator<Item = SourceCitation>) -> Vec<SourceCitation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|c| match c.identity_key() {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .collect()
}

/// Sources of the passages cited in `answer`, in first-citation order and
/// deduplicated by document.
///
/// Indices are 1-based into `hits`; out-of-range ones are ignored. If no
/// cited index is valid, every retrieved source is returned instead.
pub fn select_cited_sources(answer: &str, hits: &[Hit]) -> Vec<SourceCitation> {
    let mut cited = Vec::new();
    for capture in CITATION_RE.captures_iter(answer) {
        let index = match capture[1].parse::<usize>() {
            Ok(i) if (1..=hits.len()).contains(&i) => i - 1,
            _ => continue,
        };
        if !cited.contains(&index) {
            cited.push(index);
        }
    }

    if cited.is_empty() {
        tracing::warn!("answer cites no retrieved passage, attaching all retrieved sources");
        return dedup_by_identity(hits.iter().map(Hit::citation));
    }

    dedup_by_identity(cited.into_iter().map(|i| hits[i].citation()))
}

pub struct QaPipeline {
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn Generator>,
    history: HistoryConfig,
}

impl QaPipeline {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        generator: Arc<dyn Generator>,
        history: HistoryConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            history,
        }
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    /// Answer `question` from at most `top_k` retrieved passages.
    ///
    /// # Errors
    ///
    /// [`QaError::Generation`] when the answering call fails. Policy
    /// refusals (empty query, no documents, missing citation) are returned
    /// as `Ok` with the matching [`AnswerOutcome`].
    pub async fn answer(
        &self,
        question: &str,
        top_k: usize,
        history: &[HistoryTurn],
    ) -> Result<Answer, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Answer::refusal(EMPTY_QUERY_ANSWER, AnswerOutcome::EmptyQuery));
        }

        let summary = history::summarize(history, self.history.max_messages, self.history.max_chars);
        let rewritten = history::rewrite(
            question,
            history,
            self.generator.as_ref(),
            self.history.rewrite_max_messages,
        )
        .await;

        let hits = self.retriever.retrieve(&rewritten, top_k).await;
        if hits.is_empty() {
            tracing::warn!(outcome = "no_documents", "no documents available for retrieval");
            return Ok(Answer::refusal(NO_DOCUMENTS_ANSWER, AnswerOutcome::NoDocuments));
        }

        let messages = [
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(format!(
                "Conversation summary:\n{}\n\nQuestion: {}\n\nContext:\n{}",
                summary,
                question,
                format_context(&hits)
            )),
        ];

        let answer = self
            .generator
            .generate(&messages)
            .await
            .map_err(QaError::Generation)?;
        let answer = answer.trim();

        if !has_citation(answer) {
            tracing::warn!(
                outcome = "citation_missing",
                "answer missing citations, refusing to respond without sources"
            );
            return Ok(Answer::refusal(
                CITATION_MISSING_ANSWER,
                AnswerOutcome::CitationMissing,
            ));
        }

        let sources = select_cited_sources(answer, &hits);
        tracing::info!(
            outcome = "answered",
            hits = hits.len(),
            sources = sources.len(),
            "answered question"
        );
        Ok(Answer {
            answer: answer.to_string(),
            sources,
            outcome: AnswerOutcome::Answered,
        })
    }
}
