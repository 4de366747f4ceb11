//! 本地订单模块
//!
//! 已准入订单的权威列表：内存快照 + SQLite 键值槽持久化

pub mod dao;
pub mod listener;
pub mod store;

// 重新导出主要类型
pub use dao::OrderDao;
pub use listener::{EmptyOrderListener, OrderListener};
pub use store::LocalOrderStore;
