//! Schema creation for the three SQLite databases.
//!
//! Each store runs its own migration when opened, so the functions here are
//! idempotent. [`run_migrations`] touches all three and backs `gqa init`.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::config::Config;
use crate::db;

const DOCUMENT_COLUMNS: [&str; 5] = ["chunk_ids", "doc_id", "ext", "original_name", "stored_path"];

const CREATE_DOCUMENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        doc_id TEXT PRIMARY KEY,
        original_name TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        ext TEXT NOT NULL,
        chunk_ids TEXT NOT NULL
    )
"#;

async fn column_names(pool: &SqlitePool, table: &str) -> Result<BTreeSet<String>> {
    let names: Vec<String> =
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .fetch_all(pool)
            .await?;
    Ok(names.into_iter().collect())
}

/// Create the document registry table.
///
/// A `documents` table left behind by an incompatible layout is dropped and
/// recreated; its rows are not migrated.
pub async fn migrate_registry(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_DOCUMENTS).execute(pool).await?;

    let existing = column_names(pool, "documents").await?;
    let desired: BTreeSet<String> = DOCUMENT_COLUMNS.iter().map(|c| c.to_string()).collect();
    if existing != desired {
        tracing::warn!(
            columns = ?existing,
            "documents table has an unexpected layout, recreating it"
        );
        sqlx::query("DROP TABLE IF EXISTS documents")
            .execute(pool)
            .await?;
        sqlx::query(CREATE_DOCUMENTS).execute(pool).await?;
    }

    Ok(())
}

/// Create the conversation and message tables, adding `messages.sources`
/// to transcripts written before citations were stored.
pub async fn migrate_conversations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            sources TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (conversation_id) REFERENCES conversations(conversation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id)",
    )
    .execute(pool)
    .await?;

    if !column_names(pool, "messages").await?.contains("sources") {
        tracing::info!("adding sources column to messages");
        sqlx::query("ALTER TABLE messages ADD COLUMN sources TEXT NOT NULL DEFAULT '[]'")
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Create the tables backing [`crate::dense::SqliteDenseIndex`].
pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            source_path TEXT NOT NULL,
            doc_format TEXT,
            original_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create every database and table the configuration points at.
pub async fn run_migrations(config: &Config) -> Result<()> {
    std::fs::create_dir_all(config.paths.uploads_dir())?;

    let pool = db::connect(&config.paths.registry_db()).await?;
    migrate_registry(&pool).await?;
    pool.close().await;

    let pool = db::connect(&config.paths.conversations_db()).await?;
    migrate_conversations(&pool).await?;
    pool.close().await;

    let pool = db::connect(&config.paths.index_db()).await?;
    migrate_index(&pool).await?;
    pool.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registry_migration_recreates_legacy_layout() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("registry.sqlite3")).await.unwrap();
        sqlx::query("CREATE TABLE documents (doc_id TEXT PRIMARY KEY, filename TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO documents VALUES ('old', 'a.txt')")
            .execute(&pool)
            .await
            .unwrap();

        migrate_registry(&pool).await.unwrap();

        let columns = column_names(&pool, "documents").await.unwrap();
        assert!(columns.contains("chunk_ids"));
        assert!(!columns.contains("filename"));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_conversation_migration_adds_sources_column() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("conv.sqlite3")).await.unwrap();
        sqlx::query(
            "CREATE TABLE messages (message_id INTEGER PRIMARY KEY AUTOINCREMENT, \
             conversation_id TEXT NOT NULL, role TEXT NOT NULL, content TEXT NOT NULL, \
             created_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate_conversations(&pool).await.unwrap();
        migrate_conversations(&pool).await.unwrap();

        assert!(column_names(&pool, "messages")
            .await
            .unwrap()
            .contains("sources"));
    }
}
