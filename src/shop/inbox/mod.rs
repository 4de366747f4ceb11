//! 收件箱模块
//!
//! 尚未准入的订单候选暂存区，三路生产者共用，插入时统一去重

pub mod listener;
pub mod store;

pub use listener::{EmptyInboxListener, InboxListener};
pub use store::{CandidateOrigin, InboxItem, InboxStore, Removed, TryAddOutcome};
