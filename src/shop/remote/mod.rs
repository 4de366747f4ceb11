//! 云端收件箱模块
//!
//! 买家把订单写入 `stores/<storeId>/inbox`，代购端通过事件流实时订阅；
//! 表单设置（是否开放、截止时间）保存在 `stores/<storeId>/settings`。

pub mod api;
pub mod stream;
pub mod types;

pub use api::{HttpRemoteStore, RemoteEventSink, RemoteStore, SubscriptionHandle};
pub use types::{FormSettings, RemoteConfig};
