//! kama-chat 实时聊天核心 / kama-chat realtime chat core
//!
//! WebSocket 接入 → 消息总线 → 分发器（落库、扇出、缓存），
//! 外加 HTTP 历史查询与缓存修复后台任务
//! WebSocket access → message bus → dispatcher (persist, fan out, cache),
//! plus HTTP history queries and the cache repair background task

pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod hub;
pub mod service;
pub mod store;
pub mod tasks;
pub mod ws;
