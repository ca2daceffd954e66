//! Document registry: one row per uploaded document.
//!
//! The registry is the authority on which documents exist. Each record's
//! `chunk_ids` mirrors exactly the chunks stored for it in the dense index,
//! so deletion can remove them without a scan.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::DocumentRecord;

pub struct DocumentRegistry {
    pool: SqlitePool,
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord> {
    let doc_id: String = row.get("doc_id");
    let chunk_ids_json: String = row.get("chunk_ids");
    let chunk_ids = if chunk_ids_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&chunk_ids_json)
            .with_context(|| format!("Corrupt chunk_ids for document {}", doc_id))?
    };

    Ok(DocumentRecord {
        doc_id,
        original_name: row.get("original_name"),
        stored_path: row.get("stored_path"),
        ext: row.get("ext"),
        chunk_ids,
    })
}

impl DocumentRegistry {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self> {
        migrate::migrate_registry(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn add(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (doc_id, original_name, stored_path, ext, chunk_ids)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.doc_id)
        .bind(&record.original_name)
        .bind(&record.stored_path)
        .bind(&record.ext)
        .bind(serde_json::to_string(&record.chunk_ids)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT doc_id, original_name, stored_path, ext, chunk_ids
            FROM documents
            WHERE doc_id = ?
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Most recently added first.
    pub async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, original_name, stored_path, ext, chunk_ids
            FROM documents
            ORDER BY rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Delete and return the record, or `None` if it was not registered.
    pub async fn remove(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT doc_id, original_name, stored_path, ext, chunk_ids
            FROM documents
            WHERE doc_id = ?
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = row_to_record(&row)?;

        sqlx::query("DELETE FROM documents WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(record))
    }
}
