use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult,
};
use super::ids::{ConversationId, MessageId};
use super::types::{ConversationRecord, MessageRecord, SenderKind, unix_timestamp_seconds};
use super::{ConversationStore, MessageStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = connect_options(&database_url, "sqlite-open-parse-url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker
        // thread with its own current-thread runtime to avoid nested-runtime
        // blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl ConversationStore for SqliteStorage {
    fn create_or_get_conversation(
        &self,
        user_id: &str,
        peer_id: &str,
    ) -> StorageResult<ConversationRecord> {
        let database_url = self.database_url.clone();
        let user_id = user_id.to_string();
        let peer_id = peer_id.to_string();

        self.run_db_call("conversation-create-or-get", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-create-or-get-connect")
                    .await?;
            let now = u64_to_i64(unix_timestamp_seconds(), "conversation-create-or-get-now")?;

            sqlx::query(
                "INSERT INTO conversations (id, user_id, peer_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (user_id, peer_id) DO NOTHING",
            )
            .bind(ConversationId::new_v7().to_string())
            .bind(&user_id)
            .bind(&peer_id)
            .bind(now)
            .bind(now)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-create-or-get-insert",
            })?;

            let row = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, user_id, peer_id, updated_at FROM conversations \
                 WHERE user_id = ? AND peer_id = ?",
            )
            .bind(&user_id)
            .bind(&peer_id)
            .fetch_one(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-create-or-get-select",
            })?;

            row.into_record()
        })
    }
}

impl MessageStore for SqliteStorage {
    fn upsert_message(
        &self,
        conversation_id: ConversationId,
        message: MessageRecord,
    ) -> StorageResult<()> {
        let database_url = self.database_url.clone();

        self.run_db_call("message-upsert", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-upsert-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-upsert-begin",
            })?;

            let created_at = u64_to_i64(message.created_at_unix_seconds, "message-upsert-created-at")?;

            // Placeholder ids are reused for final content; on conflict only
            // the content changes so seq and created_at stay stable.
            sqlx::query(
                "INSERT INTO messages \
                 (id, conversation_id, sender, sender_id, receiver_id, content, created_at, seq) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, \
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?)) \
                 ON CONFLICT (id) DO UPDATE SET content = excluded.content",
            )
            .bind(message.id.to_string())
            .bind(conversation_id.to_string())
            .bind(message.sender.as_str())
            .bind(&message.sender_id)
            .bind(&message.receiver_id)
            .bind(&message.content)
            .bind(created_at)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-upsert-insert",
            })?;

            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(u64_to_i64(unix_timestamp_seconds(), "message-upsert-touch")?)
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-upsert-touch-conversation",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-upsert-commit",
            })?;

            Ok(())
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();

        self.run_db_call("message-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-list-connect").await?;

            // SQLite treats LIMIT -1 as unlimited.
            let limit = if limit == 0 { -1 } else { u64_to_i64(limit as u64, "message-list-limit")? };
            let offset = u64_to_i64(offset as u64, "message-list-offset")?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, sender, sender_id, receiver_id, content, created_at \
                 FROM messages WHERE conversation_id = ? \
                 ORDER BY seq ASC LIMIT ? OFFSET ?",
            )
            .bind(conversation_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-select",
            })?;

            rows.into_iter().map(MessageRow::into_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    user_id: String,
    peer_id: String,
    updated_at: i64,
}

impl ConversationRow {
    fn into_record(self) -> StorageResult<ConversationRecord> {
        Ok(ConversationRecord {
            id: ConversationId::parse(&self.id)?,
            user_id: self.user_id,
            peer_id: self.peer_id,
            updated_at_unix_seconds: i64_to_u64(self.updated_at, "conversation-row-updated-at")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sender: String,
    sender_id: String,
    receiver_id: String,
    content: String,
    created_at: i64,
}

impl MessageRow {
    fn into_record(self) -> StorageResult<MessageRecord> {
        let sender = SenderKind::parse(&self.sender).ok_or_else(|| {
            InvariantViolationSnafu {
                stage: "message-row-sender",
                details: format!("unknown sender kind '{}'", self.sender),
            }
            .build()
        })?;

        Ok(MessageRecord {
            id: MessageId::parse(&self.id)?,
            conversation_id: ConversationId::parse(&self.conversation_id)?,
            sender,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            created_at_unix_seconds: i64_to_u64(self.created_at, "message-row-created-at")?,
        })
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let options = connect_options(database_url, stage)?;
    SqliteConnection::connect_with(&options)
        .await
        .context(SqliteConnectSnafu {
            stage,
            database_url: database_url.to_string(),
        })
}

fn connect_options(database_url: &str, stage: &'static str) -> StorageResult<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(database_url)
        .context(SqliteConnectOptionsSnafu {
            stage,
            database_url: database_url.to_string(),
        })?
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5_000)))
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let Some(parent) = Path::new(database_location).parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
        stage: "sqlite-ensure-directory",
        path: parent.display().to_string(),
    })
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        database_location.to_string()
    } else {
        format!("sqlite://{database_location}")
    }
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        InvariantViolationSnafu {
            stage,
            details: format!("value {value} exceeds i64 range"),
        }
        .build()
    })
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        InvariantViolationSnafu {
            stage,
            details: format!("value {value} is negative"),
        }
        .build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::unix_timestamp_seconds;

    fn temp_database_path() -> String {
        std::env::temp_dir()
            .join(format!("reclaim-storage-test-{}.db", uuid::Uuid::new_v4()))
            .display()
            .to_string()
    }

    fn message(
        conversation_id: ConversationId,
        id: MessageId,
        sender: SenderKind,
        content: &str,
    ) -> MessageRecord {
        MessageRecord {
            id,
            conversation_id,
            sender,
            sender_id: "user-1".to_string(),
            receiver_id: "companion".to_string(),
            content: content.to_string(),
            created_at_unix_seconds: unix_timestamp_seconds(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn round_trips_messages_with_upsert_semantics() {
        let path = temp_database_path();
        let storage = SqliteStorage::open(&path).await.unwrap();

        let conversation = storage
            .create_or_get_conversation("user-1", "companion")
            .unwrap();
        let again = storage
            .create_or_get_conversation("user-1", "companion")
            .unwrap();
        assert_eq!(conversation.id, again.id);

        let user_message_id = MessageId::new_v7();
        let assistant_message_id = MessageId::new_v7();

        storage
            .upsert_message(
                conversation.id,
                message(conversation.id, user_message_id, SenderKind::User, "hi"),
            )
            .unwrap();
        storage
            .upsert_message(
                conversation.id,
                message(conversation.id, assistant_message_id, SenderKind::Ai, ""),
            )
            .unwrap();
        // Finalization reuses the placeholder id.
        storage
            .upsert_message(
                conversation.id,
                message(
                    conversation.id,
                    assistant_message_id,
                    SenderKind::Ai,
                    "Hello there!",
                ),
            )
            .unwrap();

        let messages = storage.list_messages(conversation.id, 0, 0).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "Hello there!");
        assert_eq!(messages[1].id, assistant_message_id);

        let _ = std::fs::remove_file(&path);
    }
}
