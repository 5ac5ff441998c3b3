//! 内存缓存实现 / In-memory cache
//!
//! 单机部署与测试替身共用；支持模拟后端故障以验证修复路径
//! Shared by single-node deployments and tests; can simulate backend
//! failures to exercise the repair path

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CacheError, RecentCache, RelationAction, RepairTask};
use crate::domain::keys::{followers_key, following_key};

pub struct MemoryCache {
    list_cap: usize,
    lists: Mutex<HashMap<String, Vec<String>>>,
    relations: Mutex<HashMap<String, BTreeSet<String>>>,
    repair: Mutex<VecDeque<RepairTask>>,
    broken: AtomicBool,
}

impl MemoryCache {
    pub fn new(list_cap: usize) -> Self {
        Self {
            list_cap: list_cap.max(1),
            lists: Mutex::new(HashMap::new()),
            relations: Mutex::new(HashMap::new()),
            repair: Mutex::new(VecDeque::new()),
            broken: AtomicBool::new(false),
        }
    }

    /// 模拟缓存不可达 / Simulate an unreachable cache backend
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn relation_members(&self, key: &str) -> Vec<String> {
        self.relations
            .lock()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn repair_queue_len(&self) -> usize {
        self.repair.lock().len()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("cache unreachable".to_string()));
        }
        Ok(())
    }

    fn trim(&self, list: &mut Vec<String>) {
        if list.len() > self.list_cap {
            let excess = list.len() - self.list_cap;
            list.drain(..excess);
        }
    }
}

#[async_trait]
impl RecentCache for MemoryCache {
    async fn get_recent(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        self.check()?;
        Ok(self
            .lists
            .lock()
            .get(key)
            .filter(|list| !list.is_empty())
            .cloned())
    }

    async fn put_recent(&self, key: &str, entries: &[String]) -> Result<(), CacheError> {
        self.check()?;
        let mut list = entries.to_vec();
        self.trim(&mut list);
        self.lists.lock().insert(key.to_string(), list);
        Ok(())
    }

    async fn append_and_trim(&self, key: &str, entry: &str) -> Result<(), CacheError> {
        self.check()?;
        let mut lists = self.lists.lock();
        if let Some(list) = lists.get_mut(key) {
            list.push(entry.to_string());
            self.trim(list);
        }
        Ok(())
    }

    async fn apply_relation(
        &self,
        action: RelationAction,
        subject: &str,
        target: &str,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut relations = self.relations.lock();
        match action {
            RelationAction::Follow => {
                relations
                    .entry(following_key(subject))
                    .or_default()
                    .insert(target.to_string());
                relations
                    .entry(followers_key(target))
                    .or_default()
                    .insert(subject.to_string());
            }
            RelationAction::Unfollow => {
                if let Some(set) = relations.get_mut(&following_key(subject)) {
                    set.remove(target);
                }
                if let Some(set) = relations.get_mut(&followers_key(target)) {
                    set.remove(subject);
                }
            }
        }
        Ok(())
    }

    // 修复队列独立于数据面，后端故障期间仍可入队
    // The repair queue is independent of the data plane and stays
    // writable while the backend is down
    async fn record_repair(&self, task: &RepairTask) -> Result<(), CacheError> {
        self.repair.lock().push_back(task.clone());
        Ok(())
    }

    async fn pop_repair(&self) -> Result<Option<RepairTask>, CacheError> {
        Ok(self.repair.lock().pop_front())
    }
}
