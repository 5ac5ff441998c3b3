//! 业务服务层 / Business service layer

pub mod history;

pub use history::HistoryService;
