//! In-memory BM25 index over every chunk in the dense index.
//!
//! Scoring is delegated to the `bm25` crate with its French tokenizer
//! (lowercasing, stop words, stemming); ranking ties keep corpus order.
//!
//! The index is a rebuild-on-demand cache owned by the retriever. A corpus
//! generation counter is bumped by [`LexicalIndex::notify_corpus_changed`]
//! after each ingestion or deletion; a query that finds the index built for
//! an older generation rebuilds it from [`DenseIndex::dump`] under the write
//! lock before searching, so readers never observe a partial build.
//!
//! A failed rebuild is logged and leaves the index disabled for that
//! generation: lexical search then returns nothing until the corpus changes
//! again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};
use tokio::sync::RwLock;

use crate::dense::DenseIndex;
use crate::models::Hit;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// BM25 engine over one `dump()` snapshot, keyed by position in it.
struct Bm25 {
    hits: Vec<Hit>,
    engine: SearchEngine<usize>,
}

impl Bm25 {
    fn build(hits: Vec<Hit>) -> Self {
        let documents: Vec<Document<usize>> = hits
            .iter()
            .enumerate()
            .map(|(position, hit)| Document {
                id: position,
                contents: hit.text.clone(),
            })
            .collect();

        let engine = SearchEngineBuilder::<usize>::with_documents(Language::French, documents)
            .k1(K1)
            .b(B)
            .build();

        Self { hits, engine }
    }

    fn search(&self, query: &str, k: usize) -> Vec<Hit> {
        if k == 0 || self.hits.is_empty() || query.trim().is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .engine
            .search(query, self.hits.len())
            .into_iter()
            .filter(|result| result.score > 0.0)
            .map(|result| (result.document.id, result.score))
            .collect();

        // Score descending, corpus position ascending on ties.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(k)
            .filter_map(|(position, _)| self.hits.get(position).cloned())
            .collect()
    }
}

enum State {
    Empty,
    BuildFailed { generation: u64 },
    Ready { built_at: u64, bm25: Bm25 },
}

impl State {
    fn is_current(&self, generation: u64) -> bool {
        match self {
            State::Empty => false,
            State::BuildFailed { generation: g } => *g == generation,
            State::Ready { built_at, .. } => *built_at == generation,
        }
    }

    fn search(&self, query: &str, k: usize) -> Vec<Hit> {
        match self {
            State::Ready { bm25, .. } => bm25.search(query, k),
            _ => Vec::new(),
        }
    }
}

/// Observable state of the lexical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexicalStatus {
    Empty,
    BuildFailed { generation: u64 },
    Ready { built_at: u64, documents: usize },
}

pub struct LexicalIndex {
    dense: Arc<dyn DenseIndex>,
    generation: AtomicU64,
    state: RwLock<State>,
}

impl LexicalIndex {
    pub fn new(dense: Arc<dyn DenseIndex>) -> Self {
        Self {
            dense,
            generation: AtomicU64::new(0),
            state: RwLock::new(State::Empty),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark the current index stale. Cheap; the rebuild happens on the next
    /// search.
    pub fn notify_corpus_changed(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "lexical index marked stale");
    }

    pub async fn status(&self) -> LexicalStatus {
        match &*self.state.read().await {
            State::Empty => LexicalStatus::Empty,
            State::BuildFailed { generation } => LexicalStatus::BuildFailed {
                generation: *generation,
            },
            State::Ready { built_at, bm25 } => LexicalStatus::Ready {
                built_at: *built_at,
                documents: bm25.hits.len(),
            },
        }
    }

    /// Up to `k` chunks ranked by BM25, best first. Chunks that share no
    /// term with the query are never returned.
    pub async fn search(&self, query: &str, k: usize) -> Vec<Hit> {
        {
            let state = self.state.read().await;
            if state.is_current(self.generation()) {
                return state.search(query, k);
            }
        }

        let mut state = self.state.write().await;
        let generation = self.generation();
        if !state.is_current(generation) {
            *state = self.build(generation).await;
        }
        state.search(query, k)
    }

    async fn build(&self, generation: u64) -> State {
        match self.dense.dump().await {
            Ok(hits) => {
                tracing::info!(generation, chunks = hits.len(), "rebuilt lexical index");
                State::Ready {
                    built_at: generation,
                    bm25: Bm25::build(hits),
                }
            }
            Err(e) => {
                tracing::error!(
                    generation,
                    error = %e,
                    "failed to rebuild lexical index, lexical search disabled"
                );
                State::BuildFailed { generation }
            }
        }
    }
}
