//! 连接注册中心 / Connection registry
//!
//! 在线投递的唯一入口：不在注册表里的用户只能靠落库等上线后拉取
//! The only online-delivery path: absent users rely on the durable store

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ChatResponse;

/// 客户端连接信息 / Client connection entry
///
/// 会话持有传输句柄，注册中心只持有出站队列
/// The session owns the transport; the hub owns only the outbound queue
pub struct ClientConnection {
    pub id: String,
    /// 会话标识，防止被顶号后误删新连接 / Session token so an evicted
    /// session cannot remove its replacement on cleanup
    pub session_id: String,
    outbound: mpsc::Sender<String>,
}

pub struct Hub {
    connections: DashMap<String, ClientConnection>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// 注册连接，同一id重复登录会顶掉旧连接（旧队列随之关闭）
    /// Register; a second login for the same id evicts the old entry,
    /// closing its queue. Returns the session token for this registration.
    pub fn register(&self, id: &str, outbound: mpsc::Sender<String>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let entry = ClientConnection {
            id: id.to_string(),
            session_id: session_id.clone(),
            outbound,
        };
        if self.connections.insert(id.to_string(), entry).is_some() {
            warn!("用户 {} 重复登录，旧连接已被顶下线 / duplicate login, old connection evicted", id);
        }
        info!("欢迎来到kama聊天服务器，亲爱的用户{} / client registered", id);
        if let Ok(payload) = serde_json::to_string(&ChatResponse::welcome(id)) {
            self.lookup_and_send(id, &payload);
        }
        session_id
    }

    /// 注销连接；条目被移除后出站队列关闭，写循环随之退出
    /// Unregister; dropping the entry closes the queue and ends the write loop
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            info!("用户{}退出登录 / client unregistered", id);
        }
        removed
    }

    /// 会话级注销，只移除仍属于该会话的条目
    /// Session-scoped unregister; only removes the entry still owned by this session
    pub fn unregister_session(&self, id: &str, session_id: &str) -> bool {
        self.connections
            .remove_if(id, |_, conn| conn.session_id == session_id)
            .is_some()
    }

    /// 非阻塞投递；用户不在线或队列已满则丢弃
    /// Non-blocking delivery; dropped when the id is absent or the queue is full
    pub fn lookup_and_send(&self, id: &str, payload: &str) -> bool {
        match self.connections.get(id) {
            Some(conn) => match conn.outbound.try_send(payload.to_string()) {
                Ok(()) => true,
                Err(err) => {
                    warn!("用户 {} 出站队列不可用，消息丢弃 / outbound queue rejected: {err}", id);
                    false
                }
            },
            None => {
                debug!("用户 {} 不在线，跳过在线投递 / offline, skip live delivery", id);
                false
            }
        }
    }

    /// 广播，返回成功入队的连接数 / Broadcast, returns accepted count
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        for conn in self.connections.iter() {
            if conn.outbound.try_send(payload.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
