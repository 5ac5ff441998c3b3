//! 历史消息查询 / Chat history queries
//!
//! 旁路缓存：命中直接返回，未命中回源存储并尽力回填。
//! 缓存故障永远不阻断查询，降级为纯存储读取。
//! Cache-aside: hits return directly, misses fall through to the store and
//! repopulate best-effort. A failing cache never blocks the query, it
//! degrades to a plain store read.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::RecentCache;
use crate::domain::{keys, ChatResponse};
use crate::store::{MessageStore, StoreError};

pub struct HistoryService {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn RecentCache>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn MessageStore>, cache: Arc<dyn RecentCache>) -> Self {
        Self { store, cache }
    }

    /// 单聊最近消息，双向合并，时间升序
    /// Recent single-chat messages, both directions merged, ascending by time
    pub async fn single_messages(
        &self,
        me: &str,
        peer: &str,
    ) -> Result<Vec<ChatResponse>, StoreError> {
        let key = keys::single_chat_key(me, peer);
        if let Some(cached) = self.read_cache(&key).await {
            return Ok(cached);
        }

        let rows = self.store.single_history(me, peer).await?;
        let responses: Vec<ChatResponse> = rows.iter().map(ChatResponse::from_row).collect();
        self.fill_cache(&key, &responses).await;
        Ok(responses)
    }

    /// 群聊最近消息 / Recent group-chat messages
    pub async fn group_messages(&self, group_id: &str) -> Result<Vec<ChatResponse>, StoreError> {
        let key = keys::group_chat_key(group_id);
        if let Some(cached) = self.read_cache(&key).await {
            return Ok(cached);
        }

        let rows = self.store.group_history(group_id).await?;
        let responses: Vec<ChatResponse> = rows.iter().map(ChatResponse::from_row).collect();
        self.fill_cache(&key, &responses).await;
        Ok(responses)
    }

    /// 读缓存：任何失败（后端故障或条目损坏）都当作未命中
    /// Cache read: any failure, backend or corrupt entry, counts as a miss
    async fn read_cache(&self, key: &str) -> Option<Vec<ChatResponse>> {
        let entries = match self.cache.get_recent(key).await {
            Ok(Some(entries)) => entries,
            Ok(None) => return None,
            Err(err) => {
                warn!("缓存读取失败，回源存储 key={} / cache read failed, falling back: {err}", key);
                return None;
            }
        };

        let mut responses = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::from_str::<ChatResponse>(entry) {
                Ok(response) => responses.push(response),
                Err(err) => {
                    error!("缓存条目损坏，回源存储 key={} / corrupt cache entry, falling back: {err}", key);
                    return None;
                }
            }
        }
        debug!("缓存命中 key={} n={} / cache hit", key, responses.len());
        Some(responses)
    }

    /// 回填缓存，失败只记日志 / Repopulate the cache, failures are logged only
    async fn fill_cache(&self, key: &str, responses: &[ChatResponse]) {
        if responses.is_empty() {
            return;
        }
        let mut entries = Vec::with_capacity(responses.len());
        for response in responses {
            match serde_json::to_string(response) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    error!("响应序列化失败，跳过回填 / serialization failed, skipping fill: {err}");
                    return;
                }
            }
        }
        if let Err(err) = self.cache.put_recent(key, &entries).await {
            warn!("缓存回填失败 key={} / cache fill failed: {err}", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::{ChatEnvelope, MessageRow};
    use crate::store::MemoryMessageStore;
    use chrono::Utc;

    fn text_envelope(from: &str, to: &str, content: &str) -> ChatEnvelope {
        ChatEnvelope {
            send_id: from.to_string(),
            receive_id: to.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn miss_then_hit_returns_identical_results() {
        let store = Arc::new(MemoryMessageStore::new());
        let cache = Arc::new(MemoryCache::new(100));
        for content in ["one", "two", "three"] {
            let row = MessageRow::from_envelope(&text_envelope("U1", "U2", content), Utc::now());
            store.insert_message(&row).await.unwrap();
        }

        let service = HistoryService::new(store.clone(), cache);
        let first = service.single_messages("U1", "U2").await.unwrap();
        let second = service.single_messages("U2", "U1").await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        // 第二次由缓存服务，存储只被查询一次
        assert_eq!(store.history_query_count(), 1);
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_store_read() {
        let store = Arc::new(MemoryMessageStore::new());
        let cache = Arc::new(MemoryCache::new(100));
        let row = MessageRow::from_envelope(&text_envelope("U1", "U2", "hello"), Utc::now());
        store.insert_message(&row).await.unwrap();

        cache.set_broken(true);
        let service = HistoryService::new(store.clone(), cache);
        let result = service.single_messages("U1", "U2").await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content, "hello");
    }

    #[tokio::test]
    async fn empty_history_is_not_cached() {
        let store = Arc::new(MemoryMessageStore::new());
        let cache = Arc::new(MemoryCache::new(100));
        let service = HistoryService::new(store.clone(), cache);

        assert!(service.single_messages("U1", "U2").await.unwrap().is_empty());
        assert!(service.single_messages("U1", "U2").await.unwrap().is_empty());
        // 空结果不回填，两次都回源
        assert_eq!(store.history_query_count(), 2);
    }
}
