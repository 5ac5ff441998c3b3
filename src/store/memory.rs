//! 内存消息存储 / In-memory message store
//!
//! 用于测试替身与单机演示，带查询计数方便断言缓存旁路行为
//! Test double and single-node demo backend; counts history queries so
//! cache-aside behavior can be asserted

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{MessageStore, StoreError};
use crate::domain::{ChatScene, MessageRow, MessageStatus};

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<MessageRow>>,
    groups: Mutex<HashMap<String, Vec<String>>>,
    history_queries: AtomicUsize,
    inserts: AtomicUsize,
    fail_inserts: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, uuid: &str, members: Vec<String>) {
        self.groups.lock().insert(uuid.to_string(), members);
    }

    pub fn messages(&self) -> Vec<MessageRow> {
        self.messages.lock().clone()
    }

    pub fn history_query_count(&self) -> usize {
        self.history_queries.load(Ordering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// 模拟持久化故障 / Simulate a persistence failure
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_message(&self, row: &MessageRow) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database("simulated insert failure".to_string()));
        }
        self.messages.lock().push(row.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_sent(&self, uuid: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.lock();
        match messages.iter_mut().find(|m| m.uuid == uuid) {
            Some(row) => {
                row.status = MessageStatus::Sent as i32;
                Ok(())
            }
            None => Err(StoreError::NotFound(uuid.to_string())),
        }
    }

    async fn single_history(&self, a: &str, b: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.history_queries.fetch_add(1, Ordering::SeqCst);
        let messages = self.messages.lock();
        Ok(messages
            .iter()
            .filter(|m| {
                (m.send_id == a && m.receive_id == b) || (m.send_id == b && m.receive_id == a)
            })
            .cloned()
            .collect())
    }

    async fn group_history(&self, group_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.history_queries.fetch_add(1, Ordering::SeqCst);
        let messages = self.messages.lock();
        Ok(messages
            .iter()
            .filter(|m| m.receive_id == group_id && m.message_type == ChatScene::Group as i32)
            .cloned()
            .collect())
    }

    async fn group_members(&self, group_uuid: &str) -> Result<Vec<String>, StoreError> {
        self.groups
            .lock()
            .get(group_uuid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("group {group_uuid}")))
    }
}
