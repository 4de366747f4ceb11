//! 订单监听器回调接口

use async_trait::async_trait;

/// 订单监听器回调接口
#[async_trait]
pub trait OrderListener: Send + Sync {
    /// 本地订单列表发生变更，参数为完整列表的 JSON 数组字符串
    async fn on_order_list_changed(&self, orders_json: String);

    /// 统计数据重新计算完成，参数为 `OrderStats` 的 JSON 字符串
    async fn on_stats_changed(&self, stats_json: String);
}

/// 默认空实现（无操作）
pub struct EmptyOrderListener;

#[async_trait]
impl OrderListener for EmptyOrderListener {
    async fn on_order_list_changed(&self, _orders_json: String) {}
    async fn on_stats_changed(&self, _stats_json: String) {}
}
