//! 剪贴板载荷编解码与 ID 生成
//!
//! 载荷格式：`RENTO_DATA::<base64(UTF-8 JSON)>::END`，JSON 为单个订单对象或订单数组。
//! 载荷可以夹在任意文本中间（买家通过聊天软件转发时常带有前后文字）。

use crate::shop::types::OrderCandidate;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

/// 载荷起始标记
pub const PAYLOAD_PREFIX: &str = "RENTO_DATA::";
/// 载荷结束标记
pub const PAYLOAD_SUFFIX: &str = "::END";

/// 载荷解析错误
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("未找到 RENTO_DATA::...::END 标记")]
    MissingEnvelope,

    #[error("base64 解码失败: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("载荷不是合法的 UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("载荷结构不符: {0}")]
    Shape(String),

    #[error("链接格式错误: {0}")]
    Url(String),
}

/// 从任意文本中截取标记之间的 base64 内容
pub fn extract_envelope(text: &str) -> Option<&str> {
    let start = text.find(PAYLOAD_PREFIX)? + PAYLOAD_PREFIX.len();
    let rest = &text[start..];
    let end = rest.find(PAYLOAD_SUFFIX)?;
    Some(&rest[..end])
}

/// base64 解码为 UTF-8 字符串（忽略载荷中被换行/空格打断的部分）
pub fn decode_base64_utf8(encoded: &str) -> Result<String, PayloadError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    Ok(String::from_utf8(bytes)?)
}

/// UTF-8 字符串编码为 base64
pub fn encode_base64_utf8(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
}

/// 解析剪贴板文本中的订单载荷
///
/// 要么整体成功，要么返回错误；数组中任何一项不是对象都视为整个载荷无效。
pub fn decode_clipboard_payload(text: &str) -> Result<Vec<OrderCandidate>, PayloadError> {
    let encoded = extract_envelope(text).ok_or(PayloadError::MissingEnvelope)?;
    let json = decode_base64_utf8(encoded)?;
    let value: Value = serde_json::from_str(&json)?;

    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(PayloadError::Shape(format!(
                "期望对象或数组，实际为 {}",
                json_kind(&other)
            )))
        }
    };
    if items.is_empty() {
        return Err(PayloadError::Shape("空数组".to_string()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            if !item.is_object() {
                return Err(PayloadError::Shape(format!(
                    "第 {} 项为 {}",
                    idx,
                    json_kind(&item)
                )));
            }
            Ok(serde_json::from_value::<OrderCandidate>(item)?)
        })
        .collect()
}

/// 把订单编码成剪贴板载荷（买家端导出用）
pub fn encode_clipboard_payload(candidates: &[OrderCandidate]) -> Result<String, PayloadError> {
    let json = match candidates {
        [single] => serde_json::to_string(single)?,
        many => serde_json::to_string(many)?,
    };
    Ok(format!(
        "{}{}{}",
        PAYLOAD_PREFIX,
        encode_base64_utf8(&json),
        PAYLOAD_SUFFIX
    ))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 生成订单 ID（毫秒时间戳 + 随机后缀，避免同一毫秒内批量导入撞号）
pub fn generate_order_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", millis, &suffix[..6])
}

/// 生成店铺 ID（只生成一次并永久保存）
pub fn generate_store_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("store_{}", &raw[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(json: &str) -> String {
        format!("{}{}{}", PAYLOAD_PREFIX, encode_base64_utf8(json), PAYLOAD_SUFFIX)
    }

    #[test]
    fn payload_inside_noise_yields_single_candidate() {
        let text = format!(
            "noise {} more noise",
            wrap(r#"{"id":"x1","buyerName":"Kim"}"#)
        );
        let candidates = decode_clipboard_payload(&text).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id(), Some("x1"));
        assert_eq!(candidates[0].buyer_name.as_deref(), Some("Kim"));
    }

    #[test]
    fn array_payload_with_multibyte_text() {
        let text = wrap(r#"[{"id":"a","productName":"抹茶巧克力"},{"id":"b"}]"#);
        let candidates = decode_clipboard_payload(&text).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].product_name.as_deref(), Some("抹茶巧克力"));
    }

    #[test]
    fn wrapped_lines_inside_payload_are_tolerated() {
        let encoded = encode_base64_utf8(r#"{"id":"split"}"#);
        let (head, tail) = encoded.split_at(6);
        let text = format!("{}{}\n{}{}", PAYLOAD_PREFIX, head, tail, PAYLOAD_SUFFIX);
        let candidates = decode_clipboard_payload(&text).unwrap();
        assert_eq!(candidates[0].id(), Some("split"));
    }

    #[test]
    fn malformed_payloads_are_rejected_whole() {
        assert!(matches!(
            decode_clipboard_payload("plain text"),
            Err(PayloadError::MissingEnvelope)
        ));
        assert!(matches!(
            decode_clipboard_payload("RENTO_DATA::***::END"),
            Err(PayloadError::Base64(_))
        ));
        assert!(matches!(
            decode_clipboard_payload(&wrap("{not json")),
            Err(PayloadError::Json(_))
        ));
        assert!(matches!(
            decode_clipboard_payload(&wrap(r#"[{"id":"ok"}, 3]"#)),
            Err(PayloadError::Shape(_))
        ));
        assert!(matches!(
            decode_clipboard_payload(&wrap(r#""just a string""#)),
            Err(PayloadError::Shape(_))
        ));
    }

    #[test]
    fn encoded_payload_decodes_back() {
        let candidate = OrderCandidate {
            id: Some("e1".into()),
            buyer_name: Some("小林".into()),
            ..Default::default()
        };
        let text = encode_clipboard_payload(std::slice::from_ref(&candidate)).unwrap();
        assert!(text.starts_with(PAYLOAD_PREFIX) && text.ends_with(PAYLOAD_SUFFIX));
        assert_eq!(decode_clipboard_payload(&text).unwrap(), vec![candidate]);
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(generate_order_id(), generate_order_id());
        assert!(generate_store_id().starts_with("store_"));
    }
}
