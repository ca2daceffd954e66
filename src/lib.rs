//! # grounded-qa
//!
//! Citation-gated question answering over a local document corpus.
//!
//! Uploaded documents are preprocessed to plain text, split into
//! structure-aware passages, embedded and stored in a dense index. Questions
//! are answered from passages found by hybrid retrieval (dense similarity
//! fused with BM25 by reciprocal rank), and an answer that cites none of
//! them is refused.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Upload    │──▶│ Preprocess   │──▶│   Dense    │◀──┐ rebuild
//! │ txt/csv/   │   │ Chunk+Embed  │   │  (SQLite)  │   │
//! │ html       │   └──────────────┘   └─────┬──────┘   │
//! └────────────┘                            │    ┌─────┴─────┐
//!                                           │    │  Lexical  │
//!                                           ▼    │  (BM25)   │
//!                      ┌──────────────────────┐  └─────┬─────┘
//!   question ─▶ sanitize ─▶ rewrite ─▶ │ RRF fusion │◀──────┘
//!                      └──────────┬───────────┘
//!                                 ▼
//!                       generate + citation gate
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gqa init
//! gqa ingest ./contracts/bail.txt
//! gqa ask "Quel est le montant du loyer ?"
//! gqa serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | QA error taxonomy |
//! | [`db`] | SQLite connection pools |
//! | [`migrate`] | Schema migrations |
//! | [`preprocess`] | txt/csv/html to plain text |
//! | [`chunk`] | Structure-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat generation provider abstraction |
//! | [`dense`] | Dense vector index |
//! | [`lexical`] | BM25 index rebuilt on demand |
//! | [`retriever`] | Hybrid retrieval and rank fusion |
//! | [`history`] | Conversation summary and question rewriting |
//! | [`safety`] | Input sanitizer |
//! | [`qa`] | Answer orchestration and citation gate |
//! | [`registry`] | Document registry |
//! | [`ingest`] | Document service |
//! | [`conversations`] | Conversation store |
//! | [`app`] | Wiring and chat turns |
//! | [`server`] | HTTP API |

pub mod app;
pub mod chunk;
pub mod config;
pub mod conversations;
pub mod db;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod history;
pub mod ingest;
pub mod lexical;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod preprocess;
pub mod qa;
pub mod registry;
pub mod retriever;
pub mod safety;
pub mod server;
