//! Error taxonomy for the question-answering pipeline.
//!
//! Plumbing (SQLite, HTTP, file I/O) propagates `anyhow::Error`; the
//! conditions a caller must tell apart are lifted into [`QaError`].
//! Single-source retrieval failures never reach the caller: the retriever
//! logs them and degrades (see [`crate::retriever`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    /// The addressed conversation or document does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A required credential or capability is missing. Not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The sanitizer refused the input. The message is user-facing.
    #[error("{0}")]
    InvalidInput(String),

    /// One retrieval source failed.
    #[error("retrieval failed ({source_name}): {message}")]
    Retrieval {
        source_name: &'static str,
        message: String,
    },

    /// The generation capability failed; no partial answer is produced.
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QaError {
    /// Machine-readable code used by the HTTP surface and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::NotFound(_) => "not_found",
            QaError::Configuration(_) => "configuration_error",
            QaError::InvalidInput(_) => "invalid_input",
            QaError::Retrieval { .. } => "retrieval_failure",
            QaError::Generation(_) => "generation_failure",
            QaError::Other(_) => "internal",
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            QaError::InvalidInput(reason) | QaError::NotFound(reason) => reason.clone(),
            QaError::Generation(_) => {
                "Une erreur est survenue lors de la génération de la réponse.".to_string()
            }
            QaError::Configuration(message) => message.clone(),
            _ => "Une erreur interne est survenue.".to_string(),
        }
    }
}
