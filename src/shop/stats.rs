//! 订单统计
//!
//! 纯函数：只依赖订单列表与成本汇率，没有任何隐藏计数器，可随时从快照重新计算。

use crate::shop::pricing::quote_price;
use crate::shop::types::OrderRecord;
use serde::{Deserialize, Serialize};

/// 订单汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    /// 外币总成本：sum(单价 * 需求数量)
    pub total_cost_foreign: f64,
    /// 本币应收总额：sum(calculatedPrice)
    pub total_billed: f64,
    /// 已收款：sum(calculatedPrice) where isPaid
    pub total_collected: f64,
    /// 利润：sum(calculatedPrice - ceil(单价 * 有效数量 * 成本汇率))
    pub total_margin: f64,
    pub order_count: usize,
    pub unpaid_count: usize,
}

impl OrderStats {
    pub fn compute(records: &[OrderRecord], cost_rate: f64) -> Self {
        records.iter().fold(OrderStats::default(), |mut acc, r| {
            acc.total_cost_foreign += r.unit_cost * r.requested_quantity as f64;
            acc.total_billed += r.calculated_price;
            if r.is_paid {
                acc.total_collected += r.calculated_price;
            } else {
                acc.unpaid_count += 1;
            }
            acc.total_margin +=
                r.calculated_price - quote_price(r.unit_cost, r.effective_quantity(), cost_rate);
            acc.order_count += 1;
            acc
        })
    }

    /// 尚未收款金额
    pub fn outstanding(&self) -> f64 {
        self.total_billed - self.total_collected
    }
}
