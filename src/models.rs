//! Core data models used throughout the crate.
//!
//! These types represent the chunks, retrieval hits, citations, document
//! records and conversation transcripts that flow through ingestion and the
//! question-answering pipeline.

use serde::{Deserialize, Serialize};

/// Deterministic chunk identifier: the fusion join key.
pub fn chunk_id(doc_id: &str, chunk_index: i64) -> String {
    format!("{}_chunk_{:04}", doc_id, chunk_index)
}

/// A passage of a document, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub source_path: String,
    pub doc_format: Option<String>,
    pub original_name: Option<String>,
}

impl Chunk {
    pub fn metadata(&self) -> HitMetadata {
        HitMetadata {
            doc_id: self.doc_id.clone(),
            chunk_index: self.chunk_index,
            source_path: self.source_path.clone(),
            doc_format: self.doc_format.clone(),
            original_name: self.original_name.clone(),
        }
    }

    pub fn to_hit(&self) -> Hit {
        Hit {
            chunk_id: self.chunk_id.clone(),
            text: self.text.clone(),
            metadata: self.metadata(),
        }
    }
}

/// Metadata carried alongside a retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitMetadata {
    pub doc_id: String,
    pub chunk_index: i64,
    pub source_path: String,
    pub doc_format: Option<String>,
    pub original_name: Option<String>,
}

/// A passage returned by the dense or the lexical index for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub chunk_id: String,
    pub text: String,
    pub metadata: HitMetadata,
}

impl Hit {
    pub fn citation(&self) -> SourceCitation {
        SourceCitation {
            doc_id: Some(self.metadata.doc_id.clone()),
            source_path: Some(self.metadata.source_path.clone()),
            chunk_index: Some(self.metadata.chunk_index),
            doc_format: self.metadata.doc_format.clone(),
            original_name: self.metadata.original_name.clone(),
        }
    }
}

/// Provenance attached to an assistant message.
///
/// Every field is optional so transcripts written by older versions (which
/// stored partial objects) still deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceCitation {
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<i64>,
    #[serde(default)]
    pub doc_format: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
}

impl SourceCitation {
    /// Document identity used to deduplicate citations.
    pub fn identity_key(&self) -> Option<&str> {
        self.doc_id
            .as_deref()
            .or(self.source_path.as_deref())
            .or(self.original_name.as_deref())
    }
}

/// Registry entry for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub original_name: String,
    pub stored_path: String,
    pub ext: String,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    /// Unknown roles read back from storage are treated as user turns.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// One prior turn fed to the history summarizer and the question rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    pub sources: Vec<SourceCitation>,
}

impl Message {
    pub fn as_turn(&self) -> HistoryTurn {
        HistoryTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        assert_eq!(chunk_id("abc", 0), "abc_chunk_0000");
        assert_eq!(chunk_id("abc", 42), "abc_chunk_0042");
        assert_eq!(chunk_id("abc", 12345), "abc_chunk_12345");
    }

    #[test]
    fn test_identity_key_fallbacks() {
        let full = SourceCitation {
            doc_id: Some("d1".into()),
            source_path: Some("/p".into()),
            ..Default::default()
        };
        assert_eq!(full.identity_key(), Some("d1"));

        let path_only = SourceCitation {
            source_path: Some("/p".into()),
            original_name: Some("a.txt".into()),
            ..Default::default()
        };
        assert_eq!(path_only.identity_key(), Some("/p"));

        let name_only = SourceCitation {
            original_name: Some("a.txt".into()),
            ..Default::default()
        };
        assert_eq!(name_only.identity_key(), Some("a.txt"));
        assert_eq!(SourceCitation::default().identity_key(), None);
    }

    #[test]
    fn test_partial_citation_deserializes() {
        let parsed: Vec<SourceCitation> =
            serde_json::from_str(r#"[{"doc_id": "d1", "original_name": "file.txt"}]"#).unwrap();
        assert_eq!(parsed[0].doc_id.as_deref(), Some("d1"));
        assert_eq!(parsed[0].chunk_index, None);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse(" User "), Role::User);
        assert_eq!(Role::parse("system"), Role::User);
    }
}
