//! 顶层错误类型 / Top-level error type

use thiserror::Error;

use crate::bus::BusError;
use crate::cache::CacheError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("配置错误 / config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("存储错误 / store error: {0}")]
    Store(#[from] StoreError),
    #[error("缓存错误 / cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("总线错误 / bus error: {0}")]
    Bus(#[from] BusError),
    #[error("IO错误 / io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
