//! SQLite-backed store. Every call opens its own connection on the blocking
//! pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{Conversation, ReactSnapshot, Store, StoreError, StoredMessage};
use crate::batch::BatchQueue;
use crate::llm::Role;

type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema.
    pub async fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> StoreResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_react_input TEXT,
                    last_react_output TEXT
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    mcp_execution_ids TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS batch_queues (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    data TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
                CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations(updated_at);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    async fn with_connection<T, F>(&self, func: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn create_conversation(&self, title: &str) -> StoreResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        let row = conversation.clone();
        self.with_connection(move |connection| {
            connection.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id,
                    row.title,
                    format_timestamp(row.created_at),
                    format_timestamp(row.updated_at)
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_connection(move |connection| {
            let row = connection
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                    params![id],
                    conversation_columns,
                )
                .optional()?;
            row.map(conversation_from_columns).transpose()
        })
        .await
    }

    async fn list_conversations(&self, limit: usize, offset: usize) -> StoreResult<Vec<Conversation>> {
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                "SELECT id, title, created_at, updated_at FROM conversations
                 ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = statement.query_map(params![limit as i64, offset as i64], conversation_columns)?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(conversation_from_columns(row?)?);
            }
            Ok(conversations)
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_connection(move |connection| {
            connection.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        mcp_execution_ids: &[String],
    ) -> StoreResult<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            mcp_execution_ids: mcp_execution_ids.to_vec(),
            created_at: Utc::now(),
        };
        let row = message.clone();
        self.with_connection(move |connection| {
            let ids = encode_ids(&row.mcp_execution_ids)?;
            let created_at = format_timestamp(row.created_at);
            let updated = connection.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![row.conversation_id, created_at],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound {
                    kind: "conversation",
                    id: row.conversation_id,
                });
            }
            connection.execute(
                "INSERT INTO messages (id, conversation_id, role, content, mcp_execution_ids, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, row.conversation_id, row.role.as_str(), row.content, ids, created_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(message)
    }

    async fn update_message(&self, message_id: &str, content: &str, mcp_execution_ids: &[String]) -> StoreResult<()> {
        let id = message_id.to_string();
        let content = content.to_string();
        let ids = encode_ids(mcp_execution_ids)?;
        self.with_connection(move |connection| {
            let updated = connection.execute(
                "UPDATE messages SET content = ?2, mcp_execution_ids = ?3 WHERE id = ?1",
                params![id, content, ids],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound { kind: "message", id });
            }
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                "SELECT id, conversation_id, role, content, mcp_execution_ids, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = statement.query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (id, conversation_id, role, content, ids, created_at) = row?;
                messages.push(StoredMessage {
                    id,
                    conversation_id,
                    role: role.parse().map_err(StoreError::InvalidData)?,
                    content,
                    mcp_execution_ids: decode_ids(ids)?,
                    created_at: parse_timestamp(created_at)?,
                });
            }
            Ok(messages)
        })
        .await
    }

    async fn save_react_snapshot(&self, conversation_id: &str, snapshot: &ReactSnapshot) -> StoreResult<()> {
        let conversation_id = conversation_id.to_string();
        let snapshot = snapshot.clone();
        self.with_connection(move |connection| {
            let updated = connection.execute(
                "UPDATE conversations SET last_react_input = ?2, last_react_output = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    conversation_id,
                    snapshot.input,
                    snapshot.output,
                    format_timestamp(Utc::now())
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound {
                    kind: "conversation",
                    id: conversation_id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn get_react_snapshot(&self, conversation_id: &str) -> StoreResult<Option<ReactSnapshot>> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let row = connection
                .query_row(
                    "SELECT last_react_input, last_react_output FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .optional()?;
            Ok(match row {
                Some((None, None)) | None => None,
                Some((input, output)) => Some(ReactSnapshot { input, output }),
            })
        })
        .await
    }

    async fn save_batch_queue(&self, queue: &BatchQueue) -> StoreResult<()> {
        let data = serde_json::to_string(queue)?;
        let id = queue.id.clone();
        let status = queue.status.to_string();
        let created_at = format_timestamp(queue.created_at);
        self.with_connection(move |connection| {
            connection.execute(
                "INSERT INTO batch_queues (id, status, created_at, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status, data = excluded.data",
                params![id, status, created_at, data],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_batch_queues(&self) -> StoreResult<Vec<BatchQueue>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare("SELECT data FROM batch_queues ORDER BY created_at ASC")?;
            let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
            let mut queues = Vec::new();
            for row in rows {
                queues.push(serde_json::from_str(&row?)?);
            }
            Ok(queues)
        })
        .await
    }

    async fn delete_batch_queue(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_connection(move |connection| {
            connection.execute("DELETE FROM batch_queues WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

type ConversationColumns = (String, String, String, String);

fn conversation_columns(row: &Row<'_>) -> rusqlite::Result<ConversationColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn conversation_from_columns((id, title, created_at, updated_at): ConversationColumns) -> StoreResult<Conversation> {
    Ok(Conversation {
        id,
        title,
        created_at: parse_timestamp(created_at)?,
        updated_at: parse_timestamp(updated_at)?,
    })
}

fn encode_ids(ids: &[String]) -> StoreResult<Option<String>> {
    if ids.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(ids)?))
}

fn decode_ids(raw: Option<String>) -> StoreResult<Vec<String>> {
    match raw.filter(|r| !r.is_empty()) {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

fn parse_timestamp(raw: String) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchTaskStatus, QueueStatus};

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::open(dir.path().join("data/test.db"))
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn conversations_and_messages_round_trip() {
        let (_dir, store) = store().await;
        let conv = store.create_conversation("scan 10.0.0.1").await.unwrap();
        store.add_message(&conv.id, Role::User, "scan 10.0.0.1", &[]).await.unwrap();
        let reply = store
            .add_message(&conv.id, Role::Assistant, "Processing...", &[])
            .await
            .unwrap();
        store
            .update_message(&reply.id, "22/tcp open", &["exec-1".to_string()])
            .await
            .unwrap();

        let loaded = store.get_conversation(&conv.id).await.unwrap().expect("exists");
        assert_eq!(loaded.title, "scan 10.0.0.1");

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "22/tcp open");
        assert_eq!(messages[1].mcp_execution_ids, vec!["exec-1".to_string()]);

        let listed = store.list_conversations(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn missing_rows_are_reported() {
        let (_dir, store) = store().await;
        assert!(store.get_conversation("nope").await.unwrap().is_none());
        assert!(matches!(
            store.add_message("nope", Role::User, "hi", &[]).await,
            Err(StoreError::NotFound { kind: "conversation", .. })
        ));
        assert!(matches!(
            store.update_message("nope", "x", &[]).await,
            Err(StoreError::NotFound { kind: "message", .. })
        ));
    }

    #[tokio::test]
    async fn react_snapshot_is_stored_on_the_conversation() {
        let (_dir, store) = store().await;
        let conv = store.create_conversation("t").await.unwrap();
        assert!(store.get_react_snapshot(&conv.id).await.unwrap().is_none());

        let snapshot = ReactSnapshot {
            input: Some("[{\"role\":\"user\",\"content\":\"hi\"}]".to_string()),
            output: Some("hello".to_string()),
        };
        store.save_react_snapshot(&conv.id, &snapshot).await.unwrap();
        assert_eq!(store.get_react_snapshot(&conv.id).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn deleting_a_conversation_cascades_to_messages() {
        let (_dir, store) = store().await;
        let conv = store.create_conversation("t").await.unwrap();
        store.add_message(&conv.id, Role::User, "hi", &[]).await.unwrap();
        store.delete_conversation(&conv.id).await.unwrap();
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_queues_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queues.db");
        let queue: BatchQueue = serde_json::from_value(serde_json::json!({
            "id": "q1",
            "title": "nightly",
            "role": "recon",
            "status": "running",
            "created_at": Utc::now(),
            "tasks": [
                {"id": "t1", "message": "scan a", "status": "completed", "result": "ok"},
                {"id": "t2", "message": "scan b", "status": "pending"}
            ]
        }))
        .unwrap();

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.save_batch_queue(&queue).await.unwrap();
            let mut updated = queue.clone();
            updated.status = QueueStatus::Paused;
            store.save_batch_queue(&updated).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let loaded = store.load_batch_queues().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, QueueStatus::Paused);
        assert_eq!(loaded[0].tasks[0].status, BatchTaskStatus::Completed);
        assert_eq!(loaded[0].tasks[1].message, "scan b");

        store.delete_batch_queue("q1").await.unwrap();
        assert!(store.load_batch_queues().await.unwrap().is_empty());
    }
}
