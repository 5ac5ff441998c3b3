//! 缓存旁路与修复队列的端到端行为
//! End-to-end cache-aside and repair-queue behavior

use std::sync::Arc;

use kama_chat::cache::{update_relation_or_repair, MemoryCache, RecentCache, RelationAction};
use kama_chat::dispatch::Dispatcher;
use kama_chat::domain::keys::following_key;
use kama_chat::domain::ChatEnvelope;
use kama_chat::hub::Hub;
use kama_chat::service::HistoryService;
use kama_chat::store::MemoryMessageStore;
use kama_chat::tasks::drain_repair_queue;

fn text_envelope(from: &str, to: &str, content: &str) -> ChatEnvelope {
    ChatEnvelope {
        send_id: from.to_string(),
        receive_id: to.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn populated_cache_absorbs_new_messages_without_store_reads() {
    let hub = Arc::new(Hub::new());
    let store = Arc::new(MemoryMessageStore::new());
    let cache = Arc::new(MemoryCache::new(100));
    let dispatcher = Dispatcher::new(hub, store.clone(), cache.clone());
    let service = HistoryService::new(store.clone(), cache);

    dispatcher.handle(text_envelope("U1", "U2", "first")).await;

    // 未命中回源并回填 / miss populates from the store
    let history = service.single_messages("U1", "U2").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(store.history_query_count(), 1);

    // 新消息追加进已存在的缓存列表 / new message lands in the populated list
    dispatcher.handle(text_envelope("U2", "U1", "second")).await;

    let history = service.single_messages("U2", "U1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "second");
    // 第二次查询完全由缓存服务 / the second query never touches the store
    assert_eq!(store.history_query_count(), 1);
}

#[tokio::test]
async fn failed_relation_update_is_repaired_after_recovery() {
    let cache = Arc::new(MemoryCache::new(100));
    let store = Arc::new(MemoryMessageStore::new());

    // 缓存不可达期间落库成功，缓存步骤转入修复队列
    // Store write succeeded while the cache was down; the cache step is queued
    cache.set_broken(true);
    update_relation_or_repair(cache.as_ref(), RelationAction::Follow, "U1", "U2").await;
    assert_eq!(cache.repair_queue_len(), 1);
    assert!(cache.relation_members(&following_key("U1")).is_empty());

    // 后端恢复后一轮排空补齐关系 / one drain after recovery reconciles
    cache.set_broken(false);
    drain_repair_queue(cache.as_ref()).await;
    assert_eq!(cache.repair_queue_len(), 0);
    assert_eq!(cache.relation_members(&following_key("U1")), vec!["U2"]);
    // 修复只动缓存，从不写存储 / repair touches the cache only, never the store
    assert_eq!(store.insert_count(), 0);
}

#[tokio::test]
async fn unfollow_repair_is_safe_to_replay() {
    let cache = Arc::new(MemoryCache::new(100));
    cache
        .apply_relation(RelationAction::Follow, "U1", "U2")
        .await
        .unwrap();

    cache.set_broken(true);
    update_relation_or_repair(cache.as_ref(), RelationAction::Unfollow, "U1", "U2").await;
    cache.set_broken(false);

    // 排空两次，重放幂等 / drained twice, replays are idempotent
    drain_repair_queue(cache.as_ref()).await;
    drain_repair_queue(cache.as_ref()).await;
    assert!(cache.relation_members(&following_key("U1")).is_empty());
    assert_eq!(cache.repair_queue_len(), 0);
}
