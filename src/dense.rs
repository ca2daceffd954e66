//! Dense (embedding) index capability.
//!
//! The retriever and the lexical index only see the [`DenseIndex`] trait.
//! Two implementations ship:
//!
//! - [`SqliteDenseIndex`]: `chunks` + `chunk_vectors` tables, brute-force
//!   cosine scan at query time. Adequate for the small corpora this tool
//!   targets.
//! - [`InMemoryDenseIndex`]: the same contract over a `Vec` behind a
//!   `RwLock`, used by tests and ephemeral runs.
//!
//! [`DenseIndex::dump`] returns every stored chunk in insertion order; the
//! lexical index is rebuilt from it.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Hit, HitMetadata};

#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Insert or replace `chunks`, pairing each with the vector at the same
    /// position.
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    async fn delete(&self, chunk_ids: &[String]) -> Result<()>;

    async fn delete_document(&self, doc_id: &str) -> Result<()>;

    /// Up to `k` nearest chunks to `vector`, most similar first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>>;

    async fn dump(&self) -> Result<Vec<Hit>>;
}

fn check_pairing(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "upsert needs one vector per chunk ({} chunks, {} vectors)",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}

/// Stable descending sort by score, then keep the first `k`.
fn top_k(mut scored: Vec<(f32, Hit)>, k: usize) -> Vec<Hit> {
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(_, hit)| hit).collect()
}

// ============ SQLite ============

pub struct SqliteDenseIndex {
    pool: SqlitePool,
}

impl SqliteDenseIndex {
    /// Wrap `pool`, creating the index tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        migrate::migrate_index(&pool).await?;
        Ok(Self { pool })
    }
}

fn row_to_hit(row: &sqlx::sqlite::SqliteRow) -> Hit {
    Hit {
        chunk_id: row.get("chunk_id"),
        text: row.get("text"),
        metadata: HitMetadata {
            doc_id: row.get("doc_id"),
            chunk_index: row.get("chunk_index"),
            source_path: row.get("source_path"),
            doc_format: row.get("doc_format"),
            original_name: row.get("original_name"),
        },
    }
}

#[async_trait]
impl DenseIndex for SqliteDenseIndex {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_pairing(chunks, vectors)?;

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks
                    (chunk_id, doc_id, chunk_index, text, source_path, doc_format, original_name)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.source_path)
            .bind(&chunk.doc_format)
            .bind(&chunk.original_name)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT OR REPLACE INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.chunk_id)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk_id in chunk_ids {
            sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT chunk_id FROM chunks WHERE doc_id = ?)",
        )
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.doc_id, c.chunk_index, c.text, c.source_path,
                   c.doc_format, c.original_name, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.chunk_id
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (cosine_similarity(vector, &blob_to_vec(&blob)), row_to_hit(row))
            })
            .collect();

        Ok(top_k(scored, k))
    }

    async fn dump(&self) -> Result<Vec<Hit>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, doc_id, chunk_index, text, source_path, doc_format, original_name
            FROM chunks
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_hit).collect())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct InMemoryDenseIndex {
    entries: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl InMemoryDenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DenseIndex for InMemoryDenseIndex {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_pairing(chunks, vectors)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            entries.retain(|(c, _)| c.chunk_id != chunk.chunk_id);
            entries.push((chunk.clone(), vector.clone()));
        }
        Ok(())
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(c, _)| !chunk_ids.contains(&c.chunk_id));
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(c, _)| c.doc_id != doc_id);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let scored = entries
            .iter()
            .map(|(chunk, stored)| (cosine_similarity(vector, stored), chunk.to_hit()))
            .collect();
        Ok(top_k(scored, k))
    }

    async fn dump(&self) -> Result<Vec<Hit>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.iter().map(|(chunk, _)| chunk.to_hit()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::chunk_id;
    use tempfile::TempDir;

    fn chunk(doc_id: &str, idx: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id(doc_id, idx),
            doc_id: doc_id.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            source_path: format!("uploads/{}_file.txt", doc_id),
            doc_format: Some("txt".to_string()),
            original_name: Some("file.txt".to_string()),
        }
    }

    async fn exercise(index: &dyn DenseIndex) {
        let chunks = vec![
            chunk("a", 0, "alpha"),
            chunk("a", 1, "beta"),
            chunk("b", 0, "gamma"),
        ];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        index.upsert(&chunks, &vectors).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a_chunk_0000");
        assert_eq!(hits[1].chunk_id, "b_chunk_0000");
        assert_eq!(hits[0].metadata.original_name.as_deref(), Some("file.txt"));

        let dumped: Vec<String> = index
            .dump()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.chunk_id)
            .collect();
        assert_eq!(dumped, vec!["a_chunk_0000", "a_chunk_0001", "b_chunk_0000"]);

        index.delete(&["a_chunk_0001".to_string()]).await.unwrap();
        assert_eq!(index.dump().await.unwrap().len(), 2);

        index.delete_document("a").await.unwrap();
        let remaining = index.dump().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metadata.doc_id, "b");

        assert!(index.query(&[1.0, 0.0], 0).await.unwrap().is_empty());
        assert!(index.upsert(&chunks, &vectors[..1]).await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_index_contract() {
        exercise(&InMemoryDenseIndex::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_index_contract() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("index.sqlite3")).await.unwrap();
        let index = SqliteDenseIndex::new(pool).await.unwrap();
        exercise(&index).await;
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_chunk() {
        let index = InMemoryDenseIndex::new();
        index
            .upsert(&[chunk("a", 0, "old")], &[vec![1.0]])
            .await
            .unwrap();
        index
            .upsert(&[chunk("a", 0, "new")], &[vec![1.0]])
            .await
            .unwrap();
        let hits = index.dump().await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new");
    }
}
