//! AI 解析结果
//!
//! 只约定交换格式：代购把买家的聊天截图/文字交给外部 AI，AI 回复一段 JSON
//! （可能裹在 ```json 代码块里）。解析结果和其它来源一样只是候选，进入收件箱后照常准入。

use crate::shop::serialization::PayloadError;
use crate::shop::types::OrderCandidate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// AI 回复的订单草稿
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price_jpy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_quantity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Value>,
}

impl AssistantDraft {
    /// 从 AI 的文本回复中解析草稿
    pub fn parse(reply: &str) -> Result<Self, PayloadError> {
        let json = extract_json_block(reply);
        let value: Value = serde_json::from_str(json)?;
        match value {
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Err(PayloadError::Shape("AI 回复不是 JSON 对象".to_string())),
        }
    }

    /// 转为候选；字段格式交给候选的宽松解析处理
    pub fn into_candidate(self) -> OrderCandidate {
        let value = match serde_json::to_value(&self) {
            Ok(v) => v,
            Err(_) => return OrderCandidate::default(),
        };
        serde_json::from_value(value).unwrap_or_default()
    }
}

/// 取出回复中的 JSON 正文：优先 ```json 代码块，其次任意代码块，最后是第一个 `{` 到最后一个 `}`
fn extract_json_block(reply: &str) -> &str {
    if let Some(start) = reply.find("```") {
        let after = &reply[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_reply() {
        let reply = "好的，以下是整理结果：\n```json\n{\"buyerName\":\"王小明\",\"productName\":\"抹茶 Kit Kat\",\"originalPriceJpy\":\"1,200\",\"requestedQuantity\":3}\n```\n如有错误请告诉我。";
        let draft = AssistantDraft::parse(reply).unwrap();
        let record = draft.into_candidate().normalize();
        assert_eq!(record.buyer_name, "王小明");
        assert_eq!(record.product_name, "抹茶 Kit Kat");
        assert_eq!(record.requested_quantity, 3);
        assert!(!record.id.is_empty());
    }

    #[test]
    fn parses_bare_json_and_defaults_missing_fields() {
        let draft = AssistantDraft::parse("{\"productName\": \"手帕\", \"notes\": \"藍色\"}").unwrap();
        let record = draft.into_candidate().normalize();
        assert_eq!(record.buyer_name, crate::shop::types::UNKNOWN_BUYER);
        assert_eq!(record.requested_quantity, 1);
        assert_eq!(record.notes.as_deref(), Some("藍色"));
    }

    #[test]
    fn non_object_reply_is_rejected() {
        assert!(AssistantDraft::parse("抱歉，我无法识别这张图片").is_err());
        assert!(AssistantDraft::parse("```json\n[1,2]\n```").is_err());
    }
}
