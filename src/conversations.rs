//! Conversation transcripts: append-only messages grouped by conversation.
//!
//! `updated_at` is bumped on every appended message and orders
//! conversations most-recent-first. Assistant messages carry their cited
//! sources as a JSON array in `messages.sources`.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{Conversation, Message, Role, SourceCitation};

/// Current UTC time as RFC 3339 with microseconds and a `Z` suffix.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_conversation(row: &SqliteRow) -> Conversation {
    Conversation {
        conversation_id: row.get("conversation_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_message(row: &SqliteRow) -> Message {
    let role: String = row.get("role");
    let sources: Option<String> = row.get("sources");
    let sources = sources
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| match serde_json::from_str::<Vec<SourceCitation>>(&s) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable message sources");
                None
            }
        })
        .unwrap_or_default();

    Message {
        message_id: row.get("message_id"),
        conversation_id: row.get("conversation_id"),
        role: Role::parse(&role),
        content: row.get("content"),
        created_at: row.get("created_at"),
        sources,
    }
}

pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self> {
        migrate::migrate_conversations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Create a conversation. Without a title it is named
    /// `Conversation {n}` where `n` is the new conversation count.
    pub async fn create(&self, title: Option<&str>) -> Result<Conversation> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => format!("Conversation {}", self.count().await? + 1),
        };
        let ts = now_timestamp();
        let conversation = Conversation {
            conversation_id: uuid::Uuid::new_v4().simple().to_string(),
            title,
            created_at: ts.clone(),
            updated_at: ts,
        };

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.conversation_id)
        .bind(&conversation.title)
        .bind(&conversation.created_at)
        .bind(&conversation.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(conversation_id = %conversation.conversation_id, "created conversation");
        Ok(conversation)
    }

    /// Most recently updated first.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, title, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_conversation).collect())
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, title, created_at, updated_at
            FROM conversations
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_conversation))
    }

    pub async fn most_recent(&self) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, title, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_conversation))
    }

    /// The most recent conversation, creating one if none exists.
    pub async fn ensure_default(&self) -> Result<Conversation> {
        match self.most_recent().await? {
            Some(existing) => Ok(existing),
            None => self.create(None).await,
        }
    }

    /// Append a message and bump the conversation's `updated_at`.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sources: &[SourceCitation],
    ) -> Result<Message> {
        let ts = now_timestamp();
        let payload = serde_json::to_string(sources)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, role, content, created_at, sources)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(&ts)
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to append message to {}", conversation_id))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE conversation_id = ?")
            .bind(&ts)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Message {
            message_id: result.last_insert_rowid(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: ts,
            sources: sources.to_vec(),
        })
    }

    /// Messages in insertion order.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, conversation_id, role, content, created_at, sources
            FROM messages
            WHERE conversation_id = ?
            ORDER BY message_id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Delete a conversation and its messages. `false` if it did not exist.
    pub async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM conversations WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(conversation_id, "deleted conversation");
        Ok(true)
    }
}

// ============ CLI ============

pub async fn run_list(store: &ConversationStore) -> Result<()> {
    let conversations = store.list().await?;
    if conversations.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    println!("{:<34} {:<28}  TITLE", "CONVERSATION_ID", "UPDATED_AT");
    for conv in conversations {
        println!(
            "{:<34} {:<28}  {}",
            conv.conversation_id, conv.updated_at, conv.title
        );
    }
    Ok(())
}

pub async fn run_new(store: &ConversationStore, title: Option<&str>) -> Result<()> {
    let conv = store.create(title).await?;
    println!("{}  {}", conv.conversation_id, conv.title);
    Ok(())
}

pub async fn run_show(store: &ConversationStore, conversation_id: &str) -> Result<()> {
    let Some(conv) = store.get(conversation_id).await? else {
        anyhow::bail!("Conversation not found: {}", conversation_id);
    };
    println!("--- {} ---", conv.title);
    println!("id:      {}", conv.conversation_id);
    println!("created: {}", conv.created_at);
    println!("updated: {}", conv.updated_at);

    for message in store.list_messages(conversation_id).await? {
        println!();
        println!("[{}] {}:", message.created_at, message.role.label());
        println!("{}", message.content);
        for source in &message.sources {
            if let Some(name) = source.original_name.as_deref().or(source.source_path.as_deref()) {
                println!("  - {}", name);
            }
        }
    }
    Ok(())
}

pub async fn run_delete(store: &ConversationStore, conversation_id: &str) -> Result<()> {
    if store.delete(conversation_id).await? {
        println!("Deleted conversation {}.", conversation_id);
        Ok(())
    } else {
        anyhow::bail!("Conversation not found: {}", conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> ConversationStore {
        ConversationStore::open(&tmp.path().join("conversations.sqlite3"))
            .await
            .unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'), "{}", ts);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn test_default_titles_count_up() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        assert_eq!(store.create(None).await.unwrap().title, "Conversation 1");
        assert_eq!(store.create(Some("Bail")).await.unwrap().title, "Bail");
        assert_eq!(store.create(Some("  ")).await.unwrap().title, "Conversation 3");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ensure_default_reuses_most_recent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let first = store.ensure_default().await.unwrap();
        let again = store.ensure_default().await.unwrap();
        assert_eq!(first.conversation_id, again.conversation_id);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_messages_round_trip_with_sources() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let conv = store.create(None).await.unwrap();

        let sources = vec![SourceCitation {
            doc_id: Some("d1".into()),
            chunk_index: Some(2),
            ..Default::default()
        }];
        store
            .add_message(&conv.conversation_id, Role::User, "Question ?", &[])
            .await
            .unwrap();
        let reply = store
            .add_message(&conv.conversation_id, Role::Assistant, "Réponse [1]", &sources)
            .await
            .unwrap();

        let messages = store.list_messages(&conv.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].sources.is_empty());
        assert_eq!(messages[1].message_id, reply.message_id);
        assert_eq!(messages[1].sources, sources);

        let updated = store.get(&conv.conversation_id).await.unwrap().unwrap();
        assert_eq!(updated.updated_at, reply.created_at);
    }

    #[tokio::test]
    async fn test_most_recent_follows_activity() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let older = store.create(Some("older")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store.create(Some("newer")).await.unwrap();
        assert_eq!(
            store.most_recent().await.unwrap().unwrap().conversation_id,
            newer.conversation_id
        );

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .add_message(&older.conversation_id, Role::User, "ping", &[])
            .await
            .unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].conversation_id, older.conversation_id);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let conv = store.create(None).await.unwrap();
        store
            .add_message(&conv.conversation_id, Role::User, "hello", &[])
            .await
            .unwrap();

        assert!(store.delete(&conv.conversation_id).await.unwrap());
        assert!(!store.delete(&conv.conversation_id).await.unwrap());
        assert!(store.get(&conv.conversation_id).await.unwrap().is_none());
        assert!(store
            .list_messages(&conv.conversation_id)
            .await
            .unwrap()
            .is_empty());
    }
}
