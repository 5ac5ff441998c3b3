//! 进程内总线：有界通道直连分发器，跳过持久化
//! In-process bus: bounded channel straight to the dispatcher, no durability

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{BusConsumer, BusError, MessageBus};

pub struct InProcessBus {
    tx: mpsc::Sender<Vec<u8>>,
}

pub struct InProcessConsumer {
    rx: mpsc::Receiver<Vec<u8>>,
}

/// 创建一对进程内总线端点 / Create a connected bus/consumer pair
pub fn in_process(capacity: usize) -> (InProcessBus, InProcessConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InProcessBus { tx }, InProcessConsumer { rx })
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, _key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        // try_send：生产者是每连接读循环，阻塞会让客户端失去心跳响应
        // try_send: the producer is a per-connection read loop; blocking it
        // would leave the client unresponsive to pings
        self.tx.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => BusError::Busy,
            TrySendError::Closed(_) => BusError::Closed,
        })
    }
}

#[async_trait]
impl BusConsumer for InProcessConsumer {
    async fn next(&mut self) -> Result<Vec<u8>, BusError> {
        self.rx.recv().await.ok_or(BusError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_in_fifo_order() {
        let (bus, mut consumer) = in_process(8);
        bus.publish("k", b"first".to_vec()).await.unwrap();
        bus.publish("k", b"second".to_vec()).await.unwrap();

        assert_eq!(consumer.next().await.unwrap(), b"first");
        assert_eq!(consumer.next().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn full_channel_fails_fast() {
        let (bus, _consumer) = in_process(1);
        bus.publish("k", b"one".to_vec()).await.unwrap();
        match bus.publish("k", b"two".to_vec()).await {
            Err(BusError::Busy) => {}
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_consumer_closes_bus() {
        let (bus, consumer) = in_process(1);
        drop(consumer);
        match bus.publish("k", b"one".to_vec()).await {
            Err(BusError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
