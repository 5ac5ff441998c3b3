//! 后台任务 / Background tasks

pub mod repair;

pub use repair::{drain_repair_queue, spawn_repair_worker};
