//! 汇率与报价

use serde::{Deserialize, Serialize};

/// 汇率配置
///
/// - `cost_rate`：外币 → 本币的实际成本汇率（代购自己付出的）
/// - `sell_rate`：外币 → 本币的报价汇率（向买家收取的）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRates {
    pub cost_rate: f64,
    pub sell_rate: f64,
}

impl Default for ExchangeRates {
    fn default() -> Self {
        Self {
            cost_rate: 0.21,
            sell_rate: 0.25,
        }
    }
}

impl ExchangeRates {
    /// 按报价汇率计算应收金额
    pub fn quote(&self, unit_cost: f64, quantity: u32) -> f64 {
        quote_price(unit_cost, quantity, self.sell_rate)
    }

    /// 按成本汇率计算实际成本
    pub fn cost(&self, unit_cost: f64, quantity: u32) -> f64 {
        quote_price(unit_cost, quantity, self.cost_rate)
    }
}

/// `ceil(unit_cost * quantity * rate)`，非法输入记为 0
pub fn quote_price(unit_cost: f64, quantity: u32, rate: f64) -> f64 {
    let total = unit_cost * quantity as f64 * rate;
    if total.is_finite() && total > 0.0 {
        total.ceil()
    } else {
        0.0
    }
}
