pub mod admission;
pub mod assistant;
pub mod client;
pub mod clipboard;
pub mod db;
pub mod inbox;
pub mod order;
pub mod pricing;
pub mod remote;
pub mod serialization;
pub mod share_link;
pub mod stats;
pub mod types;

// 重新导出客户端入口
pub use client::{submit_order, ClientConfig, RentoClient};
