//! Kafka 总线实现 / Kafka-backed durable bus
//!
//! 以会话键作为分区键：同一会话内严格有序，整体吞吐优于单分区
//! Keyed by conversation: strict ordering within a conversation, better
//! throughput than the single-partition layout

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::info;

use super::{BusConsumer, BusError, MessageBus};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaBus {
    producer: FutureProducer,
    topic: String,
}

impl KafkaBus {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| BusError::Publish(e.to_string()))?;
        info!("kafka producer 初始化完成 brokers={} topic={} / producer ready", brokers, topic);
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(err, _)| BusError::Publish(err.to_string()))?;
        Ok(())
    }
}

pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(brokers: &str, topic: &str, group_id: &str) -> Result<Self, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            // 从最新位点开始，不回放历史消息 / start at latest, no history replay
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| BusError::Consume(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Consume(e.to_string()))?;
        info!("kafka consumer 订阅成功 topic={} group={} / consumer subscribed", topic, group_id);
        Ok(Self { consumer })
    }
}

#[async_trait]
impl BusConsumer for KafkaConsumer {
    async fn next(&mut self) -> Result<Vec<u8>, BusError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(message.payload().map(|p| p.to_vec()).unwrap_or_default()),
            Err(err) => Err(BusError::Consume(err.to_string())),
        }
    }
}
