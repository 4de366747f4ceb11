//! 本地键值槽数据访问层（DAO）
//!
//! 订单列表以 JSON 形式整体保存在 `rento_orders` 槽位，店铺 ID 保存在 `rento_store_id` 槽位。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 订单列表槽位
pub const ORDERS_SLOT: &str = "rento_orders";
/// 店铺 ID 槽位
pub const STORE_ID_SLOT: &str = "rento_store_id";

/// 键值槽 DAO（基于 sqlx）
#[derive(Clone)]
pub struct OrderDao {
    db: Pool<Sqlite>,
}

impl OrderDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 读取订单列表原始 JSON（槽位不存在时返回 None）
    pub async fn load_orders_json(&self) -> Result<Option<String>> {
        self.get_slot(ORDERS_SLOT).await
    }

    /// 覆盖写入订单列表 JSON
    pub async fn save_orders_json(&self, json: &str) -> Result<()> {
        self.put_slot(ORDERS_SLOT, json).await
    }

    pub async fn get_store_id(&self) -> Result<Option<String>> {
        Ok(self
            .get_slot(STORE_ID_SLOT)
            .await?
            .filter(|id| !id.trim().is_empty()))
    }

    pub async fn save_store_id(&self, store_id: &str) -> Result<()> {
        self.put_slot(STORE_ID_SLOT, store_id).await
    }

    async fn get_slot(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM kv_slots WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await
        .context(format!("读取槽位 {} 失败", key))?;

        let value = row.map(|r| r.get::<String, _>("value"));
        debug!(
            "[OrderDAO] 读取槽位 {}: {}",
            key,
            value.as_ref().map(|v| v.len()).unwrap_or(0)
        );
        Ok(value)
    }

    async fn put_slot(&self, key: &str, value: &str) -> Result<()> {
        let sql = r#"
            INSERT INTO kv_slots (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
        "#;

        sqlx::query(sql)
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.db)
            .await
            .context(format!("写入槽位 {} 失败", key))?;
        Ok(())
    }
}
