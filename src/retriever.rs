//! Hybrid retrieval: dense and lexical rankings merged by reciprocal rank
//! fusion.
//!
//! Each source is asked for `2k` candidates, both concurrently. A chunk at
//! 1-based rank `r` earns `1 / (r + 60)` from the dense list and
//! `lexical_weight / (r + 60)` from the lexical list. The first hit seen for
//! a `chunk_id` (dense before lexical) represents it; results are stably
//! sorted by fused score and truncated to `k`.
//!
//! Retrieval never fails. A dense failure (embedding or index) degrades to
//! lexical-only, an unavailable lexical index to dense-only, and if both
//! come back empty the result is empty.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dense::DenseIndex;
use crate::embedding::Embedder;
use crate::error::QaError;
use crate::lexical::LexicalIndex;
use crate::models::Hit;

/// Rank offset of reciprocal rank fusion.
pub const RRF_K: f64 = 60.0;

/// Merge two ranked lists. Pure; see the module docs for the scoring rule.
pub fn fuse(dense: &[Hit], lexical: &[Hit], lexical_weight: f64, k: usize) -> Vec<Hit> {
    let weight = lexical_weight.clamp(0.0, 1.0);

    let mut order: Vec<&Hit> = Vec::new();
    let mut scores: HashMap<&str, (usize, f64)> = HashMap::new();

    let weighted = dense
        .iter()
        .enumerate()
        .map(|(i, hit)| (hit, 1.0 / (i as f64 + 1.0 + RRF_K)))
        .chain(
            lexical
                .iter()
                .enumerate()
                .map(|(i, hit)| (hit, weight / (i as f64 + 1.0 + RRF_K))),
        );

    for (hit, contribution) in weighted {
        let entry = scores.entry(hit.chunk_id.as_str()).or_insert_with(|| {
            order.push(hit);
            (order.len() - 1, 0.0)
        });
        entry.1 += contribution;
    }

    let mut ranked: Vec<(usize, f64)> = scores.into_values().collect();
    // Ties fall back to encounter order.
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    ranked
        .into_iter()
        .take(k)
        .map(|(position, _)| order[position].clone())
        .collect()
}

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    dense: Arc<dyn DenseIndex>,
    lexical: Arc<LexicalIndex>,
    lexical_weight: f64,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        dense: Arc<dyn DenseIndex>,
        lexical: Arc<LexicalIndex>,
        lexical_weight: f64,
    ) -> Self {
        Self {
            embedder,
            dense,
            lexical,
            lexical_weight: lexical_weight.clamp(0.0, 1.0),
        }
    }

    pub fn lexical(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    /// Invalidate the lexical snapshot after a corpus mutation.
    pub fn notify_corpus_changed(&self) {
        self.lexical.notify_corpus_changed();
    }

    /// At most `k` hits, best first, unique by `chunk_id`.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<Hit> {
        if k == 0 {
            return Vec::new();
        }
        let candidates = k.saturating_mul(2);

        let (dense, lexical) = tokio::join!(
            self.dense_search(query, candidates),
            self.lexical.search(query, candidates)
        );

        let dense = match dense {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "dense retrieval failed, continuing with lexical only");
                Vec::new()
            }
        };

        tracing::debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            k,
            "retrieved candidates"
        );

        match (dense.is_empty(), lexical.is_empty()) {
            (false, false) => fuse(&dense, &lexical, self.lexical_weight, k),
            (false, true) => dense.into_iter().take(k).collect(),
            (true, false) => lexical.into_iter().take(k).collect(),
            (true, true) => Vec::new(),
        }
    }

    async fn dense_search(&self, query: &str, k: usize) -> Result<Vec<Hit>, QaError> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| QaError::Retrieval {
                source_name: "dense",
                message: format!("embedding failed: {:#}", e),
            })?;

        self.dense
            .query(&vector, k)
            .await
            .map_err(|e| QaError::Retrieval {
                source_name: "dense",
                message: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HitMetadata;

    fn hit(id: &str, text: &str) -> Hit {
        Hit {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: HitMetadata {
                doc_id: "doc".to_string(),
                chunk_index: 0,
                source_path: "doc.txt".to_string(),
                doc_format: None,
                original_name: None,
            },
        }
    }

    fn ids(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_fuse_dedups_same_chunk() {
        let dense = vec![hit("A", "dense A"), hit("B", "dense B")];
        let lexical = vec![hit("A", "lexical A")];
        let fused = fuse(&dense, &lexical, 0.5, 5);
        assert_eq!(ids(&fused), vec!["A", "B"]);
        assert_eq!(fused[0].text, "dense A");
    }

    #[test]
    fn test_fuse_lexical_weight_orders_ties() {
        // Rank 1 in each list: dense contribution dominates unless weight is 1.
        let dense = vec![hit("D", "")];
        let lexical = vec![hit("L", "")];
        assert_eq!(ids(&fuse(&dense, &lexical, 0.4, 2)), vec!["D", "L"]);
        assert_eq!(ids(&fuse(&dense, &lexical, 1.0, 2)), vec!["D", "L"]);
        assert_eq!(ids(&fuse(&dense, &lexical, 7.0, 2)), vec!["D", "L"]);
    }

    #[test]
    fn test_fuse_agreement_beats_single_source() {
        let dense = vec![hit("A", ""), hit("B", ""), hit("C", "")];
        let lexical = vec![hit("C", ""), hit("X", "")];
        let fused = fuse(&dense, &lexical, 0.4, 3);
        assert_eq!(ids(&fused), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_fuse_zero_weight_keeps_dense_order() {
        let dense = vec![hit("A", ""), hit("B", "")];
        let lexical = vec![hit("B", ""), hit("Z", "")];
        let fused = fuse(&dense, &lexical, 0.0, 3);
        assert_eq!(ids(&fused), vec!["A", "B", "Z"]);
    }

    #[test]
    fn test_fuse_truncates() {
        let dense: Vec<Hit> = (0..10).map(|i| hit(&format!("d{}", i), "")).collect();
        assert_eq!(fuse(&dense, &[], 0.4, 3).len(), 3);
        assert!(fuse(&[], &[], 0.4, 3).is_empty());
    }

    // ─── retrieve ───────────────────────────────────────────────────

    use crate::dense::InMemoryDenseIndex;
    use crate::lexical::LexicalStatus;
    use crate::models::{chunk_id, Chunk};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                bail!("embedding endpoint down");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Records the `k` of every query; optionally refuses to dump.
    #[derive(Default)]
    struct RecordingDense {
        inner: InMemoryDenseIndex,
        queried: Mutex<Vec<usize>>,
        dump_fails: bool,
    }

    #[async_trait]
    impl DenseIndex for RecordingDense {
        async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
            self.inner.upsert(chunks, vectors).await
        }
        async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
            self.inner.delete(chunk_ids).await
        }
        async fn delete_document(&self, doc_id: &str) -> Result<()> {
            self.inner.delete_document(doc_id).await
        }
        async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
            self.queried.lock().unwrap().push(k);
            self.inner.query(vector, k).await
        }
        async fn dump(&self) -> Result<Vec<Hit>> {
            if self.dump_fails {
                bail!("dump unavailable");
            }
            self.inner.dump().await
        }
    }

    fn chunk(idx: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id("bail", idx),
            doc_id: "bail".to_string(),
            chunk_index: idx,
            text: text.to_string(),
            source_path: "bail.txt".to_string(),
            doc_format: Some("txt".to_string()),
            original_name: Some("bail.txt".to_string()),
        }
    }

    async fn seed(dense: &RecordingDense, entries: &[(&str, Vec<f32>)]) {
        let chunks: Vec<Chunk> = entries
            .iter()
            .enumerate()
            .map(|(i, (text, _))| chunk(i as i64, text))
            .collect();
        let vectors: Vec<Vec<f32>> = entries.iter().map(|(_, v)| v.clone()).collect();
        dense.upsert(&chunks, &vectors).await.unwrap();
    }

    fn retriever(fail_embedding: bool, dense: Arc<RecordingDense>) -> HybridRetriever {
        let lexical = Arc::new(LexicalIndex::new(dense.clone()));
        HybridRetriever::new(
            Arc::new(FixedEmbedder {
                fail: fail_embedding,
            }),
            dense,
            lexical,
            0.4,
        )
    }

    #[tokio::test]
    async fn test_dense_failure_returns_lexical_truncated_to_k() {
        let dense = Arc::new(RecordingDense::default());
        seed(
            &dense,
            &[
                ("loyer charges", vec![1.0, 0.0]),
                ("loyer loyer loyer", vec![1.0, 0.0]),
                ("depot de garantie", vec![1.0, 0.0]),
                ("loyer loyer indexation", vec![1.0, 0.0]),
                ("le loyer est revise chaque annee", vec![1.0, 0.0]),
            ],
        )
        .await;
        let retriever = retriever(true, dense.clone());

        let hits = retriever.retrieve("loyer", 2).await;

        let expected = LexicalIndex::new(dense.clone()).search("loyer", 4).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(ids(&hits), ids(&expected[..2]));
        assert_eq!(hits[0].chunk_id, chunk_id("bail", 1));
        assert!(dense.queried.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_build_failure_returns_dense_only() {
        let dense = Arc::new(RecordingDense {
            dump_fails: true,
            ..Default::default()
        });
        seed(
            &dense,
            &[
                ("clause penale", vec![0.0, 1.0]),
                ("loyer mensuel", vec![1.0, 0.0]),
                ("loyer annuel", vec![0.8, 0.6]),
            ],
        )
        .await;
        let retriever = retriever(false, dense.clone());

        let hits = retriever.retrieve("loyer", 2).await;

        assert_eq!(
            ids(&hits),
            vec![chunk_id("bail", 1).as_str(), chunk_id("bail", 2).as_str()]
        );
        assert_eq!(
            retriever.lexical().status().await,
            LexicalStatus::BuildFailed { generation: 0 }
        );
    }

    #[tokio::test]
    async fn test_dense_is_oversampled_to_twice_k() {
        let dense = Arc::new(RecordingDense::default());
        seed(&dense, &[("loyer", vec![1.0, 0.0])]).await;
        let retriever = retriever(false, dense.clone());

        retriever.retrieve("loyer", 3).await;
        assert_eq!(*dense.queried.lock().unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn test_huge_k_does_not_overflow() {
        let dense = Arc::new(RecordingDense::default());
        seed(&dense, &[("loyer", vec![1.0, 0.0])]).await;
        let retriever = retriever(false, dense.clone());

        let hits = retriever.retrieve("loyer", usize::MAX).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(*dense.queried.lock().unwrap(), vec![usize::MAX]);
    }
}
