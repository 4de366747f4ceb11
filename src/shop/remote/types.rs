//! 云端数据结构

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 云端连接配置（随分享链接下发给买家端）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 实时数据库根地址，例如 `https://rento-default-rtdb.firebaseio.com`
    #[serde(rename = "databaseURL")]
    pub database_url: String,
    /// REST 请求附带的 `auth` 参数（数据库密钥或 ID token）
    #[serde(rename = "authToken", default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// 其它前端 SDK 字段（apiKey、projectId 等），原样透传
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: None,
            extra: Map::new(),
        }
    }

    /// 拼接 REST 地址：`<databaseURL>/<path>.json[?auth=...]`，auth 参数按查询串编码
    pub fn rest_url(&self, path: &str) -> Result<Url> {
        let base = self.database_url.trim_end_matches('/');
        let path = path.trim_matches('/');
        let mut url = Url::parse(&format!("{}/{}.json", base, path))
            .with_context(|| format!("云端地址无效: {}", self.database_url))?;
        if let Some(token) = self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }
}

/// 收件箱路径
pub fn inbox_path(store_id: &str) -> String {
    format!("stores/{}/inbox", store_id)
}

/// 表单设置路径
pub fn settings_path(store_id: &str) -> String {
    format!("stores/{}/settings", store_id)
}

/// 买家表单设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSettings {
    #[serde(default)]
    pub is_form_active: bool,
    #[serde(default)]
    pub deadline: String,
}

/// 追加写入的返回值（云端生成的 key）
#[derive(Debug, Deserialize)]
pub struct PushResp {
    pub name: String,
}
