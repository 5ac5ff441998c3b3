//! Postgres 消息存储 / Postgres-backed message store

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::{MessageStore, StoreError};
use crate::domain::{MessageRow, MessageStatus};

const INIT_SQL: &str = include_str!("../../migrations/001_init.sql");

const MESSAGE_COLUMNS: &str = "uuid, session_id, type, content, url, send_id, send_name, \
     send_avatar, receive_id, file_size, file_type, file_name, av_data, status, message_type, created_at";

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!("数据库连接池就绪 max_connections={} / pg pool ready", max_connections);
        Ok(Self::new(pool))
    }

    /// 应用内置迁移 / Apply bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(INIT_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert_message(&self, row: &MessageRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO t_message (uuid, session_id, type, content, url, send_id, send_name, \
             send_avatar, receive_id, file_size, file_type, file_name, av_data, status, \
             message_type, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&row.uuid)
        .bind(&row.session_id)
        .bind(row.kind)
        .bind(&row.content)
        .bind(&row.url)
        .bind(&row.send_id)
        .bind(&row.send_name)
        .bind(&row.send_avatar)
        .bind(&row.receive_id)
        .bind(&row.file_size)
        .bind(&row.file_type)
        .bind(&row.file_name)
        .bind(&row.av_data)
        .bind(row.status)
        .bind(row.message_type)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_sent(&self, uuid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE t_message SET status = $1 WHERE uuid = $2")
            .bind(MessageStatus::Sent as i32)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn single_history(&self, a: &str, b: &str) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM t_message \
             WHERE (send_id = $1 AND receive_id = $2) OR (send_id = $2 AND receive_id = $1) \
             ORDER BY created_at ASC"
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn group_history(&self, group_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM t_message \
             WHERE receive_id = $1 AND message_type = 2 ORDER BY created_at ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn group_members(&self, group_uuid: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT gm.user_id FROM t_group g \
             JOIN t_group_member gm ON gm.group_id = g.id \
             WHERE g.uuid = $1",
        )
        .bind(group_uuid)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("group {group_uuid}")));
        }
        Ok(rows.into_iter().map(|(id,)| format!("U{id}")).collect())
    }
}
