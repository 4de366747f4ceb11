//! 云端收件箱 HTTP 客户端
//!
//! 负责所有云端读写请求与事件流订阅

use crate::shop::remote::stream::{
    apply_to_document, collection_change, interpret, SseParser, StreamUpdate,
};
use crate::shop::remote::types::{inbox_path, settings_path, FormSettings, PushResp, RemoteConfig};
use crate::shop::types::OrderCandidate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 云端事件接收方（由客户端实现，把事件转交给收件箱）
#[async_trait]
pub trait RemoteEventSink: Send + Sync {
    /// 云端收件箱新增/覆盖了条目，key 即订单 ID
    async fn on_remote_orders(&self, orders: Vec<(String, OrderCandidate)>);

    /// 云端收件箱删除了条目（可能是其他代购端已处理）
    async fn on_remote_removed(&self, keys: Vec<String>);

    /// 云端收件箱的全量内容（连接或重连时下发），不在其中的条目都已被删除
    async fn on_remote_snapshot(&self, orders: Vec<(String, OrderCandidate)>);

    /// 表单设置变更
    async fn on_form_settings(&self, settings: FormSettings);
}

/// 订阅句柄：调用 `unsubscribe` 或被 drop 时停止接收事件并释放连接
pub struct SubscriptionHandle {
    scope: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(scope: String, task: JoinHandle<()>) -> Self {
        Self { scope, task }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        info!("[Remote] 🔌 取消订阅 {}", self.scope);
        self.task.abort();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 云端收件箱能力
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 追加一条订单，返回云端生成的 key
    async fn push_order(&self, store_id: &str, candidate: &OrderCandidate) -> Result<String>;

    /// 按 key 删除云端订单
    async fn delete_order(&self, store_id: &str, key: &str) -> Result<()>;

    /// 订阅云端收件箱
    async fn subscribe_inbox(
        &self,
        store_id: &str,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<SubscriptionHandle>;

    async fn get_form_settings(&self, store_id: &str) -> Result<FormSettings>;

    async fn set_form_settings(&self, store_id: &str, settings: &FormSettings) -> Result<()>;

    /// 订阅表单设置
    async fn subscribe_form_settings(
        &self,
        store_id: &str,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<SubscriptionHandle>;
}

/// 流断开后的重连间隔
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// 基于实时数据库 REST 接口的实现
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self::with_client(client, config))
    }

    /// 使用外部配置好的 HTTP 客户端
    pub fn with_client(client: reqwest::Client, config: RemoteConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// 打开事件流并持续处理，断线后自动重连，直到服务端取消或任务被 abort
    fn spawn_stream<F>(&self, path: String, mut on_update: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(StreamUpdate) -> Option<BoxFuture<'static, ()>>
            + Send
            + 'static,
    {
        let client = self.client.clone();
        let url = self.config.rest_url(&path)?;
        let scope = path.clone();

        let task = tokio::spawn(async move {
            loop {
                info!("[Remote] 📡 打开事件流 {}", path);
                match read_event_stream(&client, url.as_str(), &mut on_update).await {
                    Ok(StreamEnd::Closed(reason)) => {
                        warn!("[Remote] ⚠️ 服务端终止订阅 {}: {}", path, reason);
                        break;
                    }
                    Ok(StreamEnd::Eof) => {
                        warn!("[Remote] 事件流 {} 已断开，{:?} 后重连", path, RECONNECT_DELAY);
                    }
                    Err(e) => {
                        error!(
                            "[Remote] ❌ 事件流 {} 出错: {:#}，{:?} 后重连",
                            path, e, RECONNECT_DELAY
                        );
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        Ok(SubscriptionHandle::new(scope, task))
    }
}

enum StreamEnd {
    Eof,
    Closed(String),
}

async fn read_event_stream<F>(
    client: &reqwest::Client,
    url: &str,
    on_update: &mut F,
) -> Result<StreamEnd>
where
    F: FnMut(StreamUpdate) -> Option<BoxFuture<'static, ()>>,
{
    let response = client
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .context("请求事件流失败")?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body));
    }

    let mut parser = SseParser::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("读取事件流失败")?;
        pending.extend_from_slice(&chunk);
        let text = take_utf8_prefix(&mut pending);
        for event in parser.feed(&text) {
            let update = interpret(&event);
            match update {
                StreamUpdate::KeepAlive | StreamUpdate::Ignored => continue,
                StreamUpdate::Closed(reason) => return Ok(StreamEnd::Closed(reason)),
                _ => {}
            }
            if let Some(fut) = on_update(update) {
                fut.await;
            }
        }
    }
    Ok(StreamEnd::Eof)
}

/// 取出缓冲区中完整的 UTF-8 前缀，被切断的多字节字符留待下一块数据
fn take_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // 非法字节：整体按有损转换处理，避免缓冲区无限增长
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// 读取响应 body 并反序列化（HTTP 错误时返回带 body 的错误）
async fn read_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T> {
    let status = response.status();
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[Remote] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[Remote] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }

    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[Remote] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}

/// 把云端条目转换为订单候选（key 即订单 ID），结构不符的条目丢弃
pub fn remote_candidates(items: Vec<(String, Value)>) -> Vec<(String, OrderCandidate)> {
    items
        .into_iter()
        .filter_map(|(key, value)| {
            if !value.is_object() {
                debug!("[Remote] 忽略非对象条目 {}", key);
                return None;
            }
            match serde_json::from_value::<OrderCandidate>(value) {
                Ok(mut candidate) => {
                    candidate.id = Some(key.clone());
                    Some((key, candidate))
                }
                Err(e) => {
                    debug!("[Remote] 忽略无法解析的条目 {}: {}", key, e);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn push_order(&self, store_id: &str, candidate: &OrderCandidate) -> Result<String> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.config.rest_url(&inbox_path(store_id))?;
        info!("[Remote] 📤 提交订单到云端收件箱 {}", store_id);
        debug!("[Remote]   请求URL: {}, 操作ID: {}", url, operation_id);

        // 云端 key 即订单 ID，不上传客户端自带的 id
        let mut body = candidate.clone();
        body.id = None;
        if body.created_at.is_none() {
            body.created_at = Some(chrono::Utc::now().timestamp_millis());
        }

        let response = self
            .client
            .post(url.as_str())
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .context("请求失败")?;
        let resp: PushResp = read_json_response(response, "提交订单").await?;
        Ok(resp.name)
    }

    async fn delete_order(&self, store_id: &str, key: &str) -> Result<()> {
        let url = self
            .config
            .rest_url(&format!("{}/{}", inbox_path(store_id), key))?;
        debug!("[Remote] 🗑️ 删除云端订单 {}", key);

        let response = self.client.delete(url.as_str()).send().await.context("请求失败")?;
        let _: Value = read_json_response(response, "删除订单").await?;
        Ok(())
    }

    async fn subscribe_inbox(
        &self,
        store_id: &str,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<SubscriptionHandle> {
        self.spawn_stream(inbox_path(store_id), move |update| {
            let change = collection_change(&update);
            if change.is_empty() {
                return None;
            }
            let sink = sink.clone();
            let fut: BoxFuture<'static, ()> = Box::pin(async move {
                let orders = remote_candidates(change.upserted);
                if change.snapshot {
                    sink.on_remote_snapshot(orders).await;
                    return;
                }
                if !orders.is_empty() {
                    sink.on_remote_orders(orders).await;
                }
                if !change.removed.is_empty() {
                    sink.on_remote_removed(change.removed).await;
                }
            });
            Some(fut)
        })
    }

    async fn get_form_settings(&self, store_id: &str) -> Result<FormSettings> {
        let url = self.config.rest_url(&settings_path(store_id))?;
        let response = self.client.get(url.as_str()).send().await.context("请求失败")?;
        let settings: Option<FormSettings> = read_json_response(response, "读取表单设置").await?;
        Ok(settings.unwrap_or_default())
    }

    async fn set_form_settings(&self, store_id: &str, settings: &FormSettings) -> Result<()> {
        let url = self.config.rest_url(&settings_path(store_id))?;
        info!(
            "[Remote] 📝 更新表单设置: 开放={}, 截止={}",
            settings.is_form_active, settings.deadline
        );
        let response = self
            .client
            .put(url.as_str())
            .json(settings)
            .send()
            .await
            .context("请求失败")?;
        let _: Value = read_json_response(response, "更新表单设置").await?;
        Ok(())
    }

    async fn subscribe_form_settings(
        &self,
        store_id: &str,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<SubscriptionHandle> {
        let mut doc = Value::Null;
        self.spawn_stream(settings_path(store_id), move |update| {
            if !apply_to_document(&mut doc, &update) {
                return None;
            }
            let settings = if doc.is_null() {
                FormSettings::default()
            } else {
                match serde_json::from_value::<FormSettings>(doc.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("[Remote] 表单设置无法解析: {}", e);
                        return None;
                    }
                }
            };
            let sink = sink.clone();
            let fut: BoxFuture<'static, ()> = Box::pin(async move {
                sink.on_form_settings(settings).await;
            });
            Some(fut)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_key_becomes_order_id() {
        let items = vec![
            ("-k1".to_string(), json!({"id": "spoofed", "buyerName": "Kim"})),
            ("-k2".to_string(), json!("not an object")),
        ];
        let candidates = remote_candidates(items);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, "-k1");
        assert_eq!(candidates[0].1.id(), Some("-k1"));
        assert_eq!(candidates[0].1.buyer_name.as_deref(), Some("Kim"));
    }

    #[test]
    fn split_multibyte_characters_wait_for_next_chunk() {
        let bytes = "抹茶".as_bytes();
        let mut pending = bytes[..4].to_vec();
        assert_eq!(take_utf8_prefix(&mut pending), "抹");
        assert_eq!(pending.len(), 1);
        pending.extend_from_slice(&bytes[4..]);
        assert_eq!(take_utf8_prefix(&mut pending), "茶");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_the_task() {
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let handle = SubscriptionHandle::new("stores/s/inbox".into(), task);
        assert!(handle.is_active());
        assert_eq!(handle.scope(), "stores/s/inbox");
        handle.unsubscribe();

        // 任务被中止后 sender 随之释放
        let closed = tokio::time::timeout(Duration::from_secs(2), alive_rx).await;
        assert!(matches!(closed, Ok(Err(_))));
    }
}
