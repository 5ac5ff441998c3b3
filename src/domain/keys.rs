//! 缓存键约定 / Cache key conventions

use super::message::{ChatEnvelope, ChatScene};

/// 修复队列键 / Repair queue key
pub const REPAIR_QUEUE_KEY: &str = "follow:repair:queue";

/// 单聊会话键，双方按字典序排序后共享同一个键
/// Single-chat conversation key; both directions share one key via the sorted pair
pub fn single_chat_key(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("message_list_{first}_{second}")
}

/// 群聊会话键 / Group-chat conversation key
pub fn group_chat_key(group_id: &str) -> String {
    format!("group_messagelist_{group_id}")
}

/// 信封对应的会话键，同时用作总线分区键
/// Conversation key for an envelope, also used as the bus partition key
pub fn conversation_key(envelope: &ChatEnvelope) -> String {
    match envelope.message_type {
        ChatScene::Single => single_chat_key(&envelope.send_id, &envelope.receive_id),
        ChatScene::Group => group_chat_key(&envelope.receive_id),
    }
}

pub fn following_key(uid: &str) -> String {
    format!("user:following:{uid}")
}

pub fn followers_key(uid: &str) -> String {
    format!("user:followers:{uid}")
}
