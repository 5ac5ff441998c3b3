//! 消息分发器 / Message dispatcher
//!
//! 总线的唯一长期消费者：落库、解析接收方、通过注册中心扇出、更新缓存。
//! 单条消息的任何子步骤失败都不会终止消费循环。
//! The single long-running bus consumer: persist, resolve recipients, fan
//! out through the hub, update the cache. No per-message failure ever
//! terminates the consume loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bus::{BusConsumer, BusError};
use crate::cache::RecentCache;
use crate::domain::{keys, AvSignal, ChatEnvelope, ChatResponse, ChatScene, MessageKind, MessageRow};
use crate::hub::Hub;
use crate::store::MessageStore;

/// 消费失败后的退避时长 / Backoff after a consumer read failure
const CONSUME_BACKOFF: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    hub: Arc<Hub>,
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn RecentCache>,
}

impl Dispatcher {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn MessageStore>, cache: Arc<dyn RecentCache>) -> Self {
        Self { hub, store, cache }
    }

    /// 消费循环：解码失败丢单条，读取失败退避重试，总线关闭才退出
    /// Consume loop: malformed payloads are dropped, read failures back off
    /// and retry; only a closed bus ends the loop
    pub async fn run(self: Arc<Self>, mut consumer: Box<dyn BusConsumer>) {
        info!("📨 分发器启动 / dispatcher started");
        loop {
            match consumer.next().await {
                Ok(payload) => {
                    let envelope = match serde_json::from_slice::<ChatEnvelope>(&payload) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            error!("总线消息解码失败，丢弃 / malformed bus payload dropped: {err}");
                            continue;
                        }
                    };
                    self.handle(envelope).await;
                }
                Err(BusError::Closed) => {
                    info!("总线已关闭，分发器退出 / bus closed, dispatcher exiting");
                    break;
                }
                Err(err) => {
                    error!("总线读取失败，退避重试 / consumer read failed, backing off: {err}");
                    sleep(CONSUME_BACKOFF).await;
                }
            }
        }
    }

    pub async fn handle(&self, envelope: ChatEnvelope) {
        match envelope.kind {
            // 心跳在会话层就地应答，不应到达这里 / answered in the session layer
            MessageKind::Heartbeat => {
                debug!("分发器收到心跳帧，忽略 / heartbeat reached dispatcher, ignored");
            }
            MessageKind::AudioOrVideo => self.handle_av(envelope).await,
            _ => self.handle_chat(envelope).await,
        }
    }

    /// 文本/文件/语音消息：先落库再扇出，最后尽力更新缓存
    /// Text/file/voice: persist first, fan out, then best-effort cache update
    async fn handle_chat(&self, envelope: ChatEnvelope) {
        let row = MessageRow::from_envelope(&envelope, Utc::now());
        let persisted = match self.store.insert_message(&row).await {
            Ok(()) => true,
            Err(err) => {
                // 这一条对离线方已经丢了，但在线体验优先，继续投递
                // Lost for offline replay, but the interactive path still runs
                error!("消息落库失败，仍尝试在线投递 uuid={} / persist failed, delivering anyway: {err}", row.uuid);
                false
            }
        };

        let payload = match serde_json::to_string(&ChatResponse::from_row(&row)) {
            Ok(payload) => payload,
            Err(err) => {
                error!("响应序列化失败 uuid={} / response serialization failed: {err}", row.uuid);
                return;
            }
        };

        let delivered = match envelope.message_type {
            ChatScene::Single => {
                let delivered = self.hub.lookup_and_send(&envelope.receive_id, &payload);
                // 后端回显：前端只渲染服务端的权威响应形态
                // Server-side echo: the frontend renders only the canonical shape
                self.hub.lookup_and_send(&envelope.send_id, &payload);
                delivered
            }
            ChatScene::Group => {
                let members = match self.store.group_members(&envelope.receive_id).await {
                    Ok(members) => members,
                    Err(err) => {
                        error!("群成员解析失败 group={} / member resolve failed: {err}", envelope.receive_id);
                        return;
                    }
                };
                let mut delivered = false;
                for member in &members {
                    if member != &envelope.send_id
                        && self.hub.lookup_and_send(member, &payload)
                    {
                        delivered = true;
                    }
                }
                self.hub.lookup_and_send(&envelope.send_id, &payload);
                delivered
            }
        };

        if delivered && persisted {
            if let Err(err) = self.store.mark_sent(&row.uuid).await {
                warn!("消息状态更新失败 uuid={} / mark sent failed: {err}", row.uuid);
            }
        }

        let key = keys::conversation_key(&envelope);
        if let Err(err) = self.cache.append_and_trim(&key, &payload).await {
            // 缓存滞后于存储，下次未命中时回源自愈
            // Cache lags the store; the next miss repopulates from it
            error!("缓存追加失败 key={} / cache append failed: {err}", key);
        }
    }

    /// 音视频信令：控制信令落库，其余只做在线转发且不回显
    /// AV signaling: control messages are persisted, everything else is
    /// live-only and never echoed
    async fn handle_av(&self, envelope: ChatEnvelope) {
        let signal = AvSignal::parse(&envelope.av_data);
        if signal.is_none() {
            warn!("音视频信令解析失败 / unparseable av payload, forwarding as-is");
        }

        let row = MessageRow::from_envelope(&envelope, Utc::now());
        let persisted = if signal.as_ref().is_some_and(AvSignal::is_persistent) {
            match self.store.insert_message(&row).await {
                Ok(()) => true,
                Err(err) => {
                    error!("通话信令落库失败 uuid={} / call signal persist failed: {err}", row.uuid);
                    false
                }
            }
        } else {
            false
        };

        // 参考实现只支持单聊通话 / calls are single-chat only
        if envelope.message_type != ChatScene::Single {
            warn!("群聊不支持音视频信令 group={} / group av unsupported", envelope.receive_id);
            return;
        }

        let payload = match serde_json::to_string(&ChatResponse::from_row(&row)) {
            Ok(payload) => payload,
            Err(err) => {
                error!("响应序列化失败 uuid={} / response serialization failed: {err}", row.uuid);
                return;
            }
        };

        // 不回显：回显会在发起方产生第二个 start_call
        // No echo: it would surface a duplicate start_call on the caller side
        let delivered = self.hub.lookup_and_send(&envelope.receive_id, &payload);
        if delivered && persisted {
            if let Err(err) = self.store.mark_sent(&row.uuid).await {
                warn!("消息状态更新失败 uuid={} / mark sent failed: {err}", row.uuid);
            }
        }
    }
}
