//! 缓存层 / Cache layer
//!
//! 最近会话列表（限长+TTL）与关注关系集合，外加尽力而为的修复队列。
//! 缓存允许与存储暂时不一致，修复队列异步把它拉回来；反方向永远不成立。
//! Recent-conversation lists (capped + TTL'd) and relation sets, plus a
//! best-effort repair queue. The cache may transiently diverge from the
//! store and is reconciled asynchronously, never the reverse.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("缓存后端错误 / cache backend error: {0}")]
    Backend(String),
    #[error("缓存数据损坏 / corrupt cache entry: {0}")]
    Serialization(String),
}

/// 关系缓存动作，重复执行等价（集合语义）
/// Relation cache action; re-application is idempotent (set semantics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationAction {
    Follow,
    Unfollow,
}

/// 修复任务：持久化成功但缓存更新失败时入队
/// Repair task, queued when the durable mutation succeeded but the cache step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairTask {
    pub action: RelationAction,
    pub subject_id: String,
    pub target_id: String,
}

#[async_trait]
pub trait RecentCache: Send + Sync {
    /// 命中返回缓存列表并刷新TTL；未命中返回 None，由调用方回源
    /// Hit: cached list with TTL refreshed; miss: None, caller repopulates
    async fn get_recent(&self, key: &str) -> Result<Option<Vec<String>>, CacheError>;

    /// 回源后整体写入，截断到最近N条，单管道完成
    /// Populate after a store read, capped to the most recent N, one pipeline
    async fn put_recent(&self, key: &str, entries: &[String]) -> Result<(), CacheError>;

    /// 追加+截断+续期，单原子管道；键不存在时不创建（防止半截列表被当成完整历史）
    /// Append + trim + TTL refresh in one atomic pipeline; absent keys are not
    /// created so a partial list can never masquerade as full history
    async fn append_and_trim(&self, key: &str, entry: &str) -> Result<(), CacheError>;

    /// 应用关注关系变更（幂等集合操作）
    /// Apply a relation mutation (idempotent set ops)
    async fn apply_relation(
        &self,
        action: RelationAction,
        subject: &str,
        target: &str,
    ) -> Result<(), CacheError>;

    async fn record_repair(&self, task: &RepairTask) -> Result<(), CacheError>;

    async fn pop_repair(&self) -> Result<Option<RepairTask>, CacheError>;
}

/// 持久化成功后的缓存步骤：失败只记修复任务，绝不回滚主操作
/// Cache step after a durable mutation: failures only enqueue a repair task,
/// the primary operation is never rolled back
pub async fn update_relation_or_repair(
    cache: &dyn RecentCache,
    action: RelationAction,
    subject: &str,
    target: &str,
) {
    if let Err(err) = cache.apply_relation(action, subject, target).await {
        error!(
            "缓存更新失败，稍后修复 subject={} target={} / cache update failed, will repair later: {err}",
            subject, target
        );
        let task = RepairTask {
            action,
            subject_id: subject.to_string(),
            target_id: target.to_string(),
        };
        if let Err(err) = cache.record_repair(&task).await {
            error!("修复任务入队失败 / failed to enqueue repair task: {err}");
        }
    }
}
