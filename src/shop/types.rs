//! 订单数据结构
//!
//! - `OrderRecord`：已准入、保存在本地的订单（字段均已校验/补全）
//! - `OrderCandidate`：来自任意外部生产者的未可信订单（剪贴板、云端、AI 解析）
//! - `OrderPatch`：管理员对本地订单的局部修改
//!
//! 所有外部数据只能经过 [`OrderCandidate::normalize`] 这一个入口变成 `OrderRecord`。

use crate::shop::serialization::generate_order_id;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 买家名称缺省值
pub const UNKNOWN_BUYER: &str = "未知買家";
/// 商品名称缺省值
pub const UNKNOWN_PRODUCT: &str = "未知商品";

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// 待采购
    #[default]
    Pending,
    /// 已采购
    Purchased,
    /// 已发货
    Shipped,
    /// 已到货
    Arrived,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Purchased => "purchased",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Arrived => "arrived",
        }
    }

    /// 宽松解析（忽略大小写与首尾空白），未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "purchased" => Some(OrderStatus::Purchased),
            "shipped" => Some(OrderStatus::Shipped),
            "arrived" => Some(OrderStatus::Arrived),
            _ => None,
        }
    }

    /// 管理员点击状态按钮时的循环顺序
    pub fn next(&self) -> Self {
        match self {
            OrderStatus::Pending => OrderStatus::Purchased,
            OrderStatus::Purchased => OrderStatus::Shipped,
            OrderStatus::Shipped => OrderStatus::Arrived,
            OrderStatus::Arrived => OrderStatus::Pending,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("未知订单状态: {}", s))
    }
}

/// 本地订单（已准入）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    /// 订单 ID（本地 + 收件箱范围内唯一，唯一去重键）
    pub id: String,
    pub buyer_name: String,
    pub product_name: String,
    /// 外币单价
    #[serde(rename = "originalPriceJpy")]
    pub unit_cost: f64,
    /// 需求数量（>= 1）
    pub requested_quantity: u32,
    /// 已买数量（0..=requested_quantity）
    #[serde(default)]
    pub purchased_quantity: u32,
    /// 本币应收金额
    #[serde(default)]
    pub calculated_price: f64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_info: Option<String>,
    /// 创建时间（毫秒）
    pub created_at: i64,
}

impl OrderRecord {
    /// 计算成本/利润时使用的数量：待采购时按需求数量，否则按已买数量
    pub fn effective_quantity(&self) -> u32 {
        if self.status == OrderStatus::Pending {
            self.requested_quantity
        } else {
            self.purchased_quantity
        }
    }

    /// 切换到下一个状态；从待采购进入已采购且尚未记录已买数量时视为全部买到
    pub fn advance_status(&mut self) {
        let next = self.status.next();
        if self.status == OrderStatus::Pending
            && next == OrderStatus::Purchased
            && self.purchased_quantity == 0
        {
            self.purchased_quantity = self.requested_quantity;
        }
        self.status = next;
    }
}

/// 未可信的订单候选
///
/// 所有字段可缺省；数字字段同时接受 JSON 数字与数字字符串。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCandidate {
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub buyer_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub product_name: Option<String>,
    #[serde(
        rename = "originalPriceJpy",
        alias = "originalPrice",
        alias = "unitCost",
        default,
        deserialize_with = "deserialize_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_cost: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub requested_quantity: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub purchased_quantity: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_price: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_paid: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub shop_info: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
}

impl OrderCandidate {
    /// 去除首尾空白后的 ID（空串视为缺失）
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// 进入收件箱前确保有 ID（收件箱以 ID 去重）
    pub fn ensure_id(&mut self) -> &str {
        if self.id().is_none() {
            self.id = Some(generate_order_id());
        } else if let Some(id) = self.id.as_mut() {
            *id = id.trim().to_string();
        }
        self.id.as_deref().unwrap_or_default()
    }

    /// 唯一准入入口：把任意来源的候选转换为合法的本地订单
    pub fn normalize(self) -> OrderRecord {
        let id = self
            .id()
            .map(str::to_string)
            .unwrap_or_else(generate_order_id);

        let requested_quantity = self
            .requested_quantity
            .and_then(non_negative)
            .map(|q| q.floor())
            .filter(|q| *q >= 1.0)
            .map(|q| q.min(u32::MAX as f64) as u32)
            .unwrap_or(1);
        let purchased_quantity = self
            .purchased_quantity
            .and_then(non_negative)
            .map(|q| q.floor().min(requested_quantity as f64) as u32)
            .unwrap_or(0);

        OrderRecord {
            id,
            buyer_name: non_blank(self.buyer_name).unwrap_or_else(|| UNKNOWN_BUYER.to_string()),
            product_name: non_blank(self.product_name)
                .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
            unit_cost: self.unit_cost.and_then(non_negative).unwrap_or(0.0),
            requested_quantity,
            purchased_quantity,
            calculated_price: self.calculated_price.and_then(non_negative).unwrap_or(0.0),
            status: self
                .status
                .as_deref()
                .and_then(OrderStatus::parse)
                .unwrap_or_default(),
            is_paid: self.is_paid.unwrap_or(false),
            notes: non_blank(self.notes),
            image_url: non_blank(self.image_url),
            shop_info: non_blank(self.shop_info),
            created_at: self
                .created_at
                .filter(|t| *t > 0)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        }
    }
}

impl From<OrderRecord> for OrderCandidate {
    fn from(r: OrderRecord) -> Self {
        Self {
            id: Some(r.id),
            buyer_name: Some(r.buyer_name),
            product_name: Some(r.product_name),
            unit_cost: Some(r.unit_cost),
            requested_quantity: Some(r.requested_quantity as f64),
            purchased_quantity: Some(r.purchased_quantity as f64),
            calculated_price: Some(r.calculated_price),
            status: Some(r.status.as_str().to_string()),
            is_paid: Some(r.is_paid),
            notes: r.notes,
            image_url: r.image_url,
            shop_info: r.shop_info,
            created_at: Some(r.created_at),
        }
    }
}

/// 本地订单局部修改（缺省字段不变；可选文本字段传空串表示清空）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(
        rename = "originalPriceJpy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchased_quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_info: Option<String>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self == &OrderPatch::default()
    }

    /// 合并到订单上，合并后重新约束数量范围
    pub fn apply_to(&self, record: &mut OrderRecord) {
        if let Some(name) = non_blank(self.buyer_name.clone()) {
            record.buyer_name = name;
        }
        if let Some(name) = non_blank(self.product_name.clone()) {
            record.product_name = name;
        }
        if let Some(cost) = self.unit_cost.and_then(non_negative) {
            record.unit_cost = cost;
        }
        if let Some(q) = self.requested_quantity {
            record.requested_quantity = q.max(1);
        }
        if let Some(q) = self.purchased_quantity {
            record.purchased_quantity = q;
        }
        if let Some(price) = self.calculated_price.and_then(non_negative) {
            record.calculated_price = price;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(paid) = self.is_paid {
            record.is_paid = paid;
        }
        if let Some(notes) = &self.notes {
            record.notes = non_blank(Some(notes.clone()));
        }
        if let Some(url) = &self.image_url {
            record.image_url = non_blank(Some(url.clone()));
        }
        if let Some(shop) = &self.shop_info {
            record.shop_info = non_blank(Some(shop.clone()));
        }
        record.purchased_quantity = record.purchased_quantity.min(record.requested_quantity);
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn non_negative(n: f64) -> Option<f64> {
    (n.is_finite() && n >= 0.0).then_some(n)
}

/// 宽松字符串：字符串原样，数字转字符串，其它视为缺失
fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// 宽松数字：JSON 数字或可解析的数字字符串（允许千分位逗号）
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

/// 宽松布尔：true/false、"true"/"false"、1/0
fn deserialize_lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// 宽松时间戳：毫秒数字，或 RFC 3339 字符串
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok()),
        _ => None,
    })
}
