//! 消息存储与群成员解析 / Message store and group membership resolver
//!
//! 持久层永远是事实来源，缓存可丢弃并从这里修复
//! The durable store is always the source of truth; caches are disposable

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MessageRow;

pub mod memory;
pub mod postgres;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库错误 / database error: {0}")]
    Database(String),
    #[error("记录不存在 / record not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 无条件落库，与接收方是否在线无关
    /// Unconditional persistence, independent of recipient online status
    async fn insert_message(&self, row: &MessageRow) -> Result<(), StoreError>;

    /// 状态仅作参考 / Status is advisory only
    async fn mark_sent(&self, uuid: &str) -> Result<(), StoreError>;

    /// 单聊完整历史，双向合并按时间升序
    /// Full single-chat history, both directions merged, ascending by time
    async fn single_history(&self, a: &str, b: &str) -> Result<Vec<MessageRow>, StoreError>;

    /// 群聊完整历史 / Full group-chat history
    async fn group_history(&self, group_id: &str) -> Result<Vec<MessageRow>, StoreError>;

    /// 解析群成员，每条群消息解析一次；核心只读群数据
    /// Resolve members, once per group-addressed envelope; core is read-only here
    async fn group_members(&self, group_uuid: &str) -> Result<Vec<String>, StoreError>;
}
