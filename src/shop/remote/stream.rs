//! 云端事件流（server-sent events）解析
//!
//! 事件格式：
//! ```text
//! event: put
//! data: {"path":"/","data":{...}}
//!
//! ```
//! - `put` 覆盖 `path` 处的数据，`data: null` 表示删除
//! - `patch` 把 `data` 中的各字段合并到 `path` 处
//! - `keep-alive` 心跳，忽略
//! - `cancel` / `auth_revoked` 服务端终止订阅

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// 一条原始事件
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// 增量解析器：字节流可能在任意位置被切开，未完整的部分留在缓冲区
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段数据，返回所有已完整的事件
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::new();
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = value.to_string(),
            "data" => data_lines.push(value),
            _ => {}
        }
    }
    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: if event.is_empty() {
            "message".to_string()
        } else {
            event
        },
        data: data_lines.join("\n"),
    })
}

/// put/patch 事件的数据体
#[derive(Debug, Deserialize)]
struct PathData {
    path: String,
    #[serde(default)]
    data: Value,
}

/// 事件的语义
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// 覆盖写入
    Put { path: String, data: Value },
    /// 合并写入
    Patch { path: String, data: Value },
    KeepAlive,
    /// 服务端终止订阅
    Closed(String),
    /// 无法识别的事件
    Ignored,
}

/// 把原始事件解释为语义事件
pub fn interpret(event: &SseEvent) -> StreamUpdate {
    match event.event.as_str() {
        "put" | "patch" => match serde_json::from_str::<PathData>(&event.data) {
            Ok(PathData { path, data }) if event.event == "put" => StreamUpdate::Put { path, data },
            Ok(PathData { path, data }) => StreamUpdate::Patch { path, data },
            Err(e) => {
                debug!("[Remote] 事件数据无法解析: {}, 原始数据: {}", e, event.data);
                StreamUpdate::Ignored
            }
        },
        "keep-alive" => StreamUpdate::KeepAlive,
        "cancel" | "auth_revoked" => StreamUpdate::Closed(event.event.clone()),
        _ => StreamUpdate::Ignored,
    }
}

/// 收件箱集合层面的变化
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionChange {
    /// 新增或整体覆盖的条目（key, 数据）
    pub upserted: Vec<(String, Value)>,
    /// 被删除的 key
    pub removed: Vec<String>,
    /// 根路径 put：`upserted` 是集合的全部内容，不在其中的条目都已不存在
    pub snapshot: bool,
}

impl CollectionChange {
    pub fn is_empty(&self) -> bool {
        !self.snapshot && self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// 把 put/patch 事件折算为集合条目的增删
///
/// 只关心条目级别的变化；`/<key>/<field>` 这种字段级修改不会产生新条目，直接忽略。
pub fn collection_change(update: &StreamUpdate) -> CollectionChange {
    let mut change = CollectionChange::default();
    let (path, data, is_put) = match update {
        StreamUpdate::Put { path, data } => (path, data, true),
        StreamUpdate::Patch { path, data } => (path, data, false),
        _ => return change,
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        // 连接（或重连）后的全量快照；data 为 null 表示集合为空
        [] if is_put => {
            change.snapshot = true;
            if let Value::Object(map) = data {
                for (key, value) in map {
                    if !value.is_null() {
                        change.upserted.push((key.clone(), value.clone()));
                    }
                }
            }
        }
        [] => {
            if let Value::Object(map) = data {
                for (key, value) in map {
                    if value.is_null() {
                        change.removed.push(key.clone());
                    } else {
                        change.upserted.push((key.clone(), value.clone()));
                    }
                }
            }
        }
        [key] if is_put => {
            if data.is_null() {
                change.removed.push(key.to_string());
            } else {
                change.upserted.push((key.to_string(), data.clone()));
            }
        }
        _ => {}
    }
    change
}

/// 把 put/patch 事件应用到单个文档上（用于表单设置订阅）
pub fn apply_to_document(doc: &mut Value, update: &StreamUpdate) -> bool {
    let (path, data, is_put) = match update {
        StreamUpdate::Put { path, data } => (path, data, true),
        StreamUpdate::Patch { path, data } => (path, data, false),
        _ => return false,
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut target = doc;
    for segment in segments {
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        target = match target.as_object_mut() {
            Some(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            None => return false,
        };
    }

    if is_put {
        *target = data.clone();
    } else if let Value::Object(fields) = data {
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        if let Some(map) = target.as_object_mut() {
            for (k, v) in fields {
                if v.is_null() {
                    map.remove(k);
                } else {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parser_handles_split_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: put\r\ndata: {\"path\":\"/\",").is_empty());
        let events = parser.feed("\"data\":null}\r\n\r\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "put");
        assert_eq!(events[0].data, r#"{"path":"/","data":null}"#);
        assert_eq!(interpret(&events[1]), StreamUpdate::KeepAlive);
    }

    #[test]
    fn initial_snapshot_and_single_item_events() {
        let snapshot = StreamUpdate::Put {
            path: "/".into(),
            data: json!({"-k1": {"buyerName": "Kim"}, "-k2": {"buyerName": "Lee"}}),
        };
        let change = collection_change(&snapshot);
        assert_eq!(change.upserted.len(), 2);
        assert!(change.removed.is_empty());
        assert!(change.snapshot);

        let emptied = StreamUpdate::Put {
            path: "/".into(),
            data: Value::Null,
        };
        let change = collection_change(&emptied);
        assert!(change.snapshot && change.upserted.is_empty());
        assert!(!change.is_empty());

        let root_patch = StreamUpdate::Patch {
            path: "/".into(),
            data: json!({"-k1": null, "-k4": {"buyerName": "Park"}}),
        };
        let change = collection_change(&root_patch);
        assert!(!change.snapshot);
        assert_eq!(change.removed, vec!["-k1".to_string()]);
        assert_eq!(change.upserted[0].0, "-k4");

        let added = StreamUpdate::Put {
            path: "/-k3".into(),
            data: json!({"productName": "手帕"}),
        };
        assert_eq!(collection_change(&added).upserted[0].0, "-k3");

        let removed = StreamUpdate::Put {
            path: "/-k1".into(),
            data: Value::Null,
        };
        assert_eq!(collection_change(&removed).removed, vec!["-k1".to_string()]);

        let field_edit = StreamUpdate::Put {
            path: "/-k2/notes".into(),
            data: json!("x"),
        };
        assert!(collection_change(&field_edit).is_empty());
    }

    #[test]
    fn cancel_closes_stream() {
        let event = SseEvent {
            event: "auth_revoked".into(),
            data: "null".into(),
        };
        assert_eq!(
            interpret(&event),
            StreamUpdate::Closed("auth_revoked".into())
        );
    }

    #[test]
    fn document_tracks_put_and_patch() {
        let mut doc = Value::Null;
        apply_to_document(
            &mut doc,
            &StreamUpdate::Put {
                path: "/".into(),
                data: json!({"isFormActive": true, "deadline": "2024-06-30"}),
            },
        );
        apply_to_document(
            &mut doc,
            &StreamUpdate::Put {
                path: "/isFormActive".into(),
                data: json!(false),
            },
        );
        apply_to_document(
            &mut doc,
            &StreamUpdate::Patch {
                path: "/".into(),
                data: json!({"deadline": "2024-07-01"}),
            },
        );
        assert_eq!(doc, json!({"isFormActive": false, "deadline": "2024-07-01"}));
    }
}
