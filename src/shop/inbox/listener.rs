//! 收件箱监听器回调接口

use async_trait::async_trait;

/// 收件箱监听器回调接口
///
/// 提示音、角标、自动打开收件箱等副作用挂在这里，保证每个新候选只触发一次。
#[async_trait]
pub trait InboxListener: Send + Sync {
    /// 有新的候选进入收件箱（只包含本次真正新增的条目），参数为 JSON 数组字符串
    async fn on_inbox_arrival(&self, items_json: String);

    /// 最后一条候选被移除，收件箱已空
    async fn on_inbox_emptied(&self);

    /// 云端表单设置（开放状态/截止时间）变更，参数为 JSON 字符串
    async fn on_form_settings_changed(&self, settings_json: String);
}

/// 默认空实现（无操作）
pub struct EmptyInboxListener;

#[async_trait]
impl InboxListener for EmptyInboxListener {
    async fn on_inbox_arrival(&self, _items_json: String) {}
    async fn on_inbox_emptied(&self) {}
    async fn on_form_settings_changed(&self, _settings_json: String) {}
}
