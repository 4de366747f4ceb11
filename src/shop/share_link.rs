//! 分享链接
//!
//! 代购把云端连接配置与店铺 ID 打包进链接的 `config` 参数发给买家，
//! 买家端据此直接向该店铺的云端收件箱提交订单。

use crate::shop::remote::RemoteConfig;
use crate::shop::serialization::{decode_base64_utf8, encode_base64_utf8, PayloadError};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// 链接中携带配置的查询参数名
pub const SHARE_QUERY_KEY: &str = "config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    /// 云端连接配置
    #[serde(rename = "c")]
    pub remote: RemoteConfig,
    /// 店铺 ID
    #[serde(rename = "s")]
    pub store_id: String,
}

impl ShareLink {
    pub fn new(remote: RemoteConfig, store_id: impl Into<String>) -> Self {
        Self {
            remote,
            store_id: store_id.into(),
        }
    }

    /// 生成链接（已有的 `config` 参数会被替换）
    pub fn encode(&self, base_url: &str) -> Result<String, PayloadError> {
        let mut url = Url::parse(base_url).map_err(|e| PayloadError::Url(e.to_string()))?;
        let json = serde_json::to_string(self)?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != SHARE_QUERY_KEY)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(SHARE_QUERY_KEY, &encode_base64_utf8(&json));
        Ok(url.to_string())
    }

    /// 解析链接
    pub fn decode(link: &str) -> Result<Self, PayloadError> {
        let url = Url::parse(link.trim()).map_err(|e| PayloadError::Url(e.to_string()))?;
        let encoded = url
            .query_pairs()
            .find(|(k, _)| k == SHARE_QUERY_KEY)
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| PayloadError::Url(format!("缺少 {} 参数", SHARE_QUERY_KEY)))?;
        let json = decode_base64_utf8(&encoded)?;
        let link: ShareLink = serde_json::from_str(&json)?;
        if link.store_id.trim().is_empty() {
            return Err(PayloadError::Shape("店铺 ID 为空".to_string()));
        }
        Ok(link)
    }
}
