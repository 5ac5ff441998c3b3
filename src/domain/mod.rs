//! 领域模型 - 消息信封与响应结构
//! Domain model - message envelopes and response shapes

pub mod keys;
pub mod message;

pub use message::{
    AvSignal, ChatEnvelope, ChatResponse, ChatScene, MessageKind, MessageRow, MessageStatus,
};
