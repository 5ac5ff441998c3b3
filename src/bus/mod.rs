//! 消息总线抽象 / Message bus abstraction
//!
//! 接收端与分发端解耦的唯一通道，两种实现可互换：
//! 进程内有界通道（跳过持久化）与 Kafka 主题（`kafka` feature）
//! The single seam decoupling ingestion from dispatch, with two
//! interchangeable implementations: a bounded in-process channel and a
//! Kafka topic behind the `kafka` feature

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::domain::{keys, ChatEnvelope};

pub mod in_process;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use in_process::{in_process, InProcessBus, InProcessConsumer};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBus, KafkaConsumer};

#[derive(Debug, Error)]
pub enum BusError {
    /// 通道已满，调用方必须快速失败而不是阻塞读循环
    /// Channel full; the caller must fail fast instead of blocking its read loop
    #[error("总线繁忙 / bus is busy")]
    Busy,
    #[error("总线已关闭 / bus closed")]
    Closed,
    #[error("消息发布失败 / publish failed: {0}")]
    Publish(String),
    #[error("消息消费失败 / consume failed: {0}")]
    Consume(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// 发布一条序列化后的信封，key 为会话键（分区键）
    /// Publish one serialized envelope, keyed by conversation (partition key)
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

#[async_trait]
pub trait BusConsumer: Send {
    /// 阻塞等待下一条总线消息 / Await the next bus message
    async fn next(&mut self) -> Result<Vec<u8>, BusError>;
}

/// 接收路径：把解码后的信封送上总线 / Ingestion path: envelope onto the bus
pub struct Ingestor {
    bus: Arc<dyn MessageBus>,
}

impl Ingestor {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub async fn ingest(&self, envelope: &ChatEnvelope) -> Result<(), BusError> {
        let key = keys::conversation_key(envelope);
        let payload =
            serde_json::to_vec(envelope).map_err(|e| BusError::Publish(e.to_string()))?;
        self.bus.publish(&key, payload).await?;
        info!("消息已进入总线 key={} / envelope ingested", key);
        Ok(())
    }
}
