//! 缓存修复任务 / Cache repair task
//!
//! 周期性排空修复队列，把落库成功但缓存失败的关系变更补写回去。
//! 补写是幂等集合操作，重复执行安全。
//! Periodically drains the repair queue, re-applying relation mutations whose
//! durable write succeeded but whose cache step failed. Re-application is an
//! idempotent set operation, so replays are safe.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::cache::RecentCache;

pub fn spawn_repair_worker(
    cache: Arc<dyn RecentCache>,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        info!("🔧 缓存修复任务启动，周期 {}s / repair worker started", interval_secs);
        let mut tick = interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    drain_repair_queue(cache.as_ref()).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("缓存修复任务退出 / repair worker stopping");
                        break;
                    }
                }
            }
        }
    });
}

/// 排空修复队列：补写失败的任务重新入队并停止本轮，等下个周期再试
/// Drain the queue: a task that fails to re-apply goes back on the queue and
/// ends this round, to be retried next tick
pub async fn drain_repair_queue(cache: &dyn RecentCache) {
    let mut repaired = 0usize;
    loop {
        let task = match cache.pop_repair().await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(err) => {
                warn!("修复队列读取失败，本轮结束 / repair queue read failed, ending round: {err}");
                break;
            }
        };

        if let Err(err) = cache
            .apply_relation(task.action, &task.subject_id, &task.target_id)
            .await
        {
            error!(
                "修复补写失败，任务重新入队 subject={} target={} / repair re-apply failed, requeued: {err}",
                task.subject_id, task.target_id
            );
            if let Err(err) = cache.record_repair(&task).await {
                error!("修复任务重入队失败，任务丢失 / requeue failed, task lost: {err}");
            }
            break;
        }
        repaired += 1;
    }
    if repaired > 0 {
        debug!("本轮修复 {} 条关系变更 / repaired {repaired} relation mutations", repaired);
    }
}
