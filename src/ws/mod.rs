//! WebSocket 接入层 / WebSocket access layer

pub mod connection;
pub mod server;

pub use server::WsServer;
