//! Redis 缓存实现 / Redis-backed cache

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use super::{CacheError, RecentCache, RelationAction, RepairTask};
use crate::domain::keys::{followers_key, following_key, REPAIR_QUEUE_KEY};

/// 关系集合的过期时间 / TTL for relation sets
const RELATION_TTL_SECS: i64 = 24 * 3600;

pub struct RedisCache {
    conn: Arc<Mutex<MultiplexedConnection>>,
    list_cap: usize,
    ttl: Duration,
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

impl RedisCache {
    pub async fn connect(url: &str, list_cap: usize, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;
        info!("redis 缓存连接就绪 {} / redis cache ready", url);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            list_cap: list_cap.max(1),
            ttl,
        })
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }

    fn cap(&self) -> isize {
        self.list_cap as isize
    }
}

#[async_trait]
impl RecentCache for RedisCache {
    async fn get_recent(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        let mut conn = self.conn.lock().await;
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(-self.cap())
            .arg(-1)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        if entries.is_empty() {
            return Ok(None);
        }
        // 命中续期 / refresh TTL on hit
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_secs())
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(Some(entries))
    }

    async fn put_recent(&self, key: &str, entries: &[String]) -> Result<(), CacheError> {
        let mut conn = self.conn.lock().await;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(key);
        for entry in entries {
            pipe.rpush(key, entry);
        }
        pipe.ltrim(key, -self.cap(), -1);
        pipe.expire(key, self.ttl_secs());
        let _: () = pipe.query_async(&mut *conn).await.map_err(backend)?;
        Ok(())
    }

    async fn append_and_trim(&self, key: &str, entry: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.lock().await;
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        if !exists {
            // 未命中过的会话不追加，等下次回源构建完整列表
            // Never-populated keys are left alone; the next miss rebuilds the full list
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.rpush(key, entry);
        pipe.ltrim(key, -self.cap(), -1);
        pipe.expire(key, self.ttl_secs());
        let _: () = pipe.query_async(&mut *conn).await.map_err(backend)?;
        Ok(())
    }

    async fn apply_relation(
        &self,
        action: RelationAction,
        subject: &str,
        target: &str,
    ) -> Result<(), CacheError> {
        let key_following = following_key(subject);
        let key_followers = followers_key(target);
        let mut conn = self.conn.lock().await;
        let mut pipe = redis::pipe();
        pipe.atomic();
        match action {
            RelationAction::Follow => {
                pipe.sadd(&key_following, target);
                pipe.sadd(&key_followers, subject);
                pipe.expire(&key_following, RELATION_TTL_SECS);
                pipe.expire(&key_followers, RELATION_TTL_SECS);
            }
            RelationAction::Unfollow => {
                pipe.srem(&key_following, target);
                pipe.srem(&key_followers, subject);
            }
        }
        let _: () = pipe.query_async(&mut *conn).await.map_err(backend)?;
        Ok(())
    }

    async fn record_repair(&self, task: &RepairTask) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(task).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let mut conn = self.conn.lock().await;
        let _: () = redis::cmd("LPUSH")
            .arg(REPAIR_QUEUE_KEY)
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn pop_repair(&self) -> Result<Option<RepairTask>, CacheError> {
        let mut conn = self.conn.lock().await;
        let payload: Option<String> = redis::cmd("RPOP")
            .arg(REPAIR_QUEUE_KEY)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        match payload {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
        }
    }
}
