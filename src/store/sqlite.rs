use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::auth::Identity;

use super::{Attachment, MessageId, MessageStore, NewMessage, RoomId, StoreResult, StoredMessage};

type MessageRow = (i64, i64, i64, String, String, OffsetDateTime, Option<String>, Option<String>);

const SELECT_MESSAGE: &str =
    "SELECT id,room_id,user_id,username,content,created_at,file_name,file_data FROM messages";

#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    db_pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id    INTEGER NOT NULL,
                user_id    INTEGER NOT NULL,
                username   TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                file_name  TEXT,
                file_data  TEXT
            )"#,
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS messages_room ON messages (room_id, id)")
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }
}

fn from_row((id, room_id, user_id, username, content, created_at, file_name, file_data): MessageRow) -> StoredMessage {
    let file = match (file_name, file_data) {
        (Some(name), Some(data)) if !name.is_empty() => Some(Attachment { name, data }),
        _ => None,
    };

    StoredMessage {
        id,
        room_id,
        author: Identity { user_id, username },
        content,
        created_at,
        file,
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: &NewMessage) -> StoreResult<MessageId> {
        let id = sqlx::query_scalar(
            "INSERT INTO messages (room_id,user_id,username,content,created_at,file_name,file_data) \
             VALUES (?,?,?,?,?,?,?) RETURNING id",
        )
        .bind(message.room_id)
        .bind(message.author.user_id)
        .bind(&message.author.username)
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.file.as_ref().map(|f| f.name.as_str()))
        .bind(message.file.as_ref().map(|f| f.data.as_str()))
        .fetch_one(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: MessageId) -> StoreResult<Option<StoredMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE id=?"))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(from_row))
    }

    async fn update_content(&self, id: MessageId, ciphertext: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE messages SET content=? WHERE id=?")
            .bind(ciphertext)
            .bind(id)
            .execute(&self.db_pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: MessageId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id=?")
            .bind(id)
            .execute(&self.db_pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_author(&self, id: MessageId) -> StoreResult<Option<Identity>> {
        let row: Option<(i64, String)> = sqlx::query_as("SELECT user_id,username FROM messages WHERE id=?")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(row.map(|(user_id, username)| Identity { user_id, username }))
    }

    async fn list_by_room(&self, room_id: RoomId) -> StoreResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE room_id=? ORDER BY id"))
            .bind(room_id)
            .fetch_all(&self.db_pool)
            .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }
}
