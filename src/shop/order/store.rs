//! 本地订单存储
//!
//! 所有修改在同一把锁内完成“改内存 → 整表写盘”，写盘完成后才返回，
//! 因此任何已返回的修改在进程崩溃后都不会丢失。读写失败只记录日志，不向调用方抛错。
//! 监听器回调在释放锁之后触发，回调中可以再次读取本存储。

use crate::shop::order::dao::OrderDao;
use crate::shop::order::listener::OrderListener;
use crate::shop::stats::OrderStats;
use crate::shop::types::{OrderCandidate, OrderPatch, OrderRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 本地订单存储（权威订单列表）
pub struct LocalOrderStore {
    dao: OrderDao,
    orders: Mutex<Vec<OrderRecord>>,
    listener: Arc<dyn OrderListener>,
    cost_rate: f64,
}

impl LocalOrderStore {
    /// 创建存储并从磁盘加载已有订单
    pub async fn open(dao: OrderDao, listener: Arc<dyn OrderListener>, cost_rate: f64) -> Self {
        let store = Self {
            dao,
            orders: Mutex::new(Vec::new()),
            listener,
            cost_rate,
        };
        store.load().await;
        store
    }

    /// 从磁盘重新加载（数据缺失或损坏时得到空列表）
    pub async fn load(&self) -> Vec<OrderRecord> {
        let loaded = match self.dao.load_orders_json().await {
            Ok(Some(json)) => parse_order_list(&json),
            Ok(None) => {
                debug!("[OrderStore] 本地尚无订单数据");
                Vec::new()
            }
            Err(e) => {
                error!("[OrderStore] ❌ 读取本地订单失败，按空列表处理: {:#}", e);
                Vec::new()
            }
        };
        info!("[OrderStore] 📋 加载本地订单 {} 条", loaded.len());

        let mut orders = self.orders.lock().await;
        *orders = loaded.clone();
        loaded
    }

    /// 整体替换订单列表并写盘（重复 ID 只保留第一条）
    pub async fn save(&self, records: Vec<OrderRecord>) {
        let snapshot = {
            let mut orders = self.orders.lock().await;
            *orders = dedup_by_id(records);
            self.persist(&orders).await;
            orders.clone()
        };
        self.notify(&snapshot).await;
    }

    /// 新增订单（插入到最前）；ID 已存在时不做任何修改并返回 false
    pub async fn append(&self, record: OrderRecord) -> bool {
        let snapshot = {
            let mut orders = self.orders.lock().await;
            if orders.iter().any(|o| o.id == record.id) {
                debug!("[OrderStore] 订单 {} 已存在，忽略重复写入", record.id);
                return false;
            }
            info!(
                "[OrderStore] ➕ 新增订单 {} ({} / {})",
                record.id, record.buyer_name, record.product_name
            );
            orders.insert(0, record);
            self.persist(&orders).await;
            orders.clone()
        };
        self.notify(&snapshot).await;
        true
    }

    /// 把局部字段合并到指定订单；订单不存在时返回 None
    pub async fn upsert_fields(&self, id: &str, patch: &OrderPatch) -> Option<OrderRecord> {
        self.update_with(id, |record| patch.apply_to(record)).await
    }

    /// 在锁内对指定订单执行修改并写盘；订单不存在时返回 None
    pub async fn update_with<F>(&self, id: &str, f: F) -> Option<OrderRecord>
    where
        F: FnOnce(&mut OrderRecord),
    {
        let (updated, snapshot) = {
            let mut orders = self.orders.lock().await;
            let record = orders.iter_mut().find(|o| o.id == id)?;
            f(record);
            let updated = record.clone();
            debug!("[OrderStore] ✏️ 更新订单 {}", id);
            self.persist(&orders).await;
            (updated, orders.clone())
        };
        self.notify(&snapshot).await;
        Some(updated)
    }

    /// 删除订单；订单不存在时返回 false
    pub async fn remove(&self, id: &str) -> bool {
        let snapshot = {
            let mut orders = self.orders.lock().await;
            let before = orders.len();
            orders.retain(|o| o.id != id);
            if orders.len() == before {
                debug!("[OrderStore] 删除的订单 {} 不存在", id);
                return false;
            }
            info!("[OrderStore] 🗑️ 删除订单 {}", id);
            self.persist(&orders).await;
            orders.clone()
        };
        self.notify(&snapshot).await;
        true
    }

    pub async fn snapshot(&self) -> Vec<OrderRecord> {
        self.orders.lock().await.clone()
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.orders
            .lock()
            .await
            .iter()
            .map(|o| o.id.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<OrderRecord> {
        self.orders.lock().await.iter().find(|o| o.id == id).cloned()
    }

    pub async fn stats(&self) -> OrderStats {
        OrderStats::compute(&self.orders.lock().await, self.cost_rate)
    }

    async fn persist(&self, orders: &[OrderRecord]) {
        let json = match serde_json::to_string(orders) {
            Ok(json) => json,
            Err(e) => {
                error!("[OrderStore] ❌ 序列化订单失败: {}", e);
                return;
            }
        };
        if let Err(e) = self.dao.save_orders_json(&json).await {
            error!("[OrderStore] ❌ 写入本地订单失败（本次修改仅保存在内存）: {:#}", e);
        }
    }

    async fn notify(&self, orders: &[OrderRecord]) {
        let stats = OrderStats::compute(orders, self.cost_rate);
        if let Ok(json) = serde_json::to_string(orders) {
            self.listener.on_order_list_changed(json).await;
        }
        if let Ok(json) = serde_json::to_string(&stats) {
            self.listener.on_stats_changed(json).await;
        }
    }
}

/// 解析持久化的订单列表；每条记录都重新经过准入校验
fn parse_order_list(json: &str) -> Vec<OrderRecord> {
    match serde_json::from_str::<Vec<OrderCandidate>>(json) {
        Ok(items) => dedup_by_id(items.into_iter().map(OrderCandidate::normalize).collect()),
        Err(e) => {
            warn!("[OrderStore] ⚠️ 本地订单数据损坏，按空列表处理: {}", e);
            Vec::new()
        }
    }
}

fn dedup_by_id(records: Vec<OrderRecord>) -> Vec<OrderRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::db::test_support::temp_pool;
    use crate::shop::order::listener::EmptyOrderListener;
    use crate::shop::types::OrderStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    fn record(id: &str) -> OrderRecord {
        OrderCandidate {
            id: Some(id.to_string()),
            buyer_name: Some("Kim".into()),
            unit_cost: Some(1000.0),
            requested_quantity: Some(2.0),
            ..Default::default()
        }
        .normalize()
    }

    async fn open(dao: OrderDao) -> LocalOrderStore {
        LocalOrderStore::open(dao, Arc::new(EmptyOrderListener), 0.25).await
    }

    #[tokio::test]
    async fn append_is_persisted_and_rejects_duplicates() {
        let (_dir, pool) = temp_pool().await;
        let dao = OrderDao::new(pool);
        let store = open(dao.clone()).await;

        assert!(store.append(record("a")).await);
        assert!(store.append(record("b")).await);
        assert!(!store.append(record("a")).await);

        let ids: Vec<String> = store.snapshot().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let reopened = open(dao).await;
        assert_eq!(reopened.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn upsert_and_remove_are_no_ops_for_unknown_ids() {
        let (_dir, pool) = temp_pool().await;
        let store = open(OrderDao::new(pool)).await;
        store.append(record("a")).await;

        let patch = OrderPatch {
            is_paid: Some(true),
            status: Some(OrderStatus::Shipped),
            ..Default::default()
        };
        assert!(store.upsert_fields("missing", &patch).await.is_none());
        assert!(!store.remove("missing").await);

        let updated = store.upsert_fields("a", &patch).await.unwrap();
        assert!(updated.is_paid);
        assert_eq!(updated.status, OrderStatus::Shipped);
        assert_eq!(store.get("a").await.unwrap(), updated);

        assert!(store.remove("a").await);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_slot_loads_as_empty() {
        let (_dir, pool) = temp_pool().await;
        let dao = OrderDao::new(pool);
        dao.save_orders_json("{ definitely not a list").await.unwrap();

        let store = open(dao).await;
        assert!(store.snapshot().await.is_empty());
        assert!(store.append(record("fresh")).await);
    }

    #[tokio::test]
    async fn concurrent_edits_do_not_lose_updates() {
        let (_dir, pool) = temp_pool().await;
        let dao = OrderDao::new(pool);
        let store = Arc::new(open(dao.clone()).await);
        store.append(record("a")).await;

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store
                        .update_with("a", |r| r.calculated_price += 1.0)
                        .await;
                } else {
                    store.append(record(&format!("n{}", i))).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let reopened = open(dao).await;
        assert_eq!(reopened.snapshot().await.len(), 11);
        assert_eq!(reopened.get("a").await.unwrap().calculated_price, 10.0);
    }

    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl OrderListener for CountingListener {
        async fn on_order_list_changed(&self, _orders_json: String) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_stats_changed(&self, stats_json: String) {
            let stats: OrderStats = serde_json::from_str(&stats_json).unwrap();
            assert!(stats.order_count > 0);
        }
    }

    #[tokio::test]
    async fn every_mutation_notifies_listener() {
        let (_dir, pool) = temp_pool().await;
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let store = LocalOrderStore::open(OrderDao::new(pool), listener.clone(), 0.25).await;

        store.append(record("a")).await;
        store.append(record("a")).await;
        store
            .upsert_fields("a", &OrderPatch { is_paid: Some(true), ..Default::default() })
            .await;
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    /// 回调中再次读取存储的监听器
    #[derive(Default)]
    struct ReadingListener {
        store: OnceLock<Weak<LocalOrderStore>>,
        seen_counts: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl OrderListener for ReadingListener {
        async fn on_order_list_changed(&self, _orders_json: String) {
            if let Some(store) = self.store.get().and_then(Weak::upgrade) {
                let stats = store.stats().await;
                let len = store.snapshot().await.len();
                assert_eq!(stats.order_count, len);
                self.seen_counts.lock().unwrap().push(len);
            }
        }
        async fn on_stats_changed(&self, _stats_json: String) {}
    }

    #[tokio::test]
    async fn listener_can_read_store_from_callback() {
        let (_dir, pool) = temp_pool().await;
        let listener = Arc::new(ReadingListener::default());
        let store =
            Arc::new(LocalOrderStore::open(OrderDao::new(pool), listener.clone(), 0.25).await);
        listener.store.set(Arc::downgrade(&store)).unwrap();

        let appended = tokio::time::timeout(Duration::from_secs(2), store.append(record("a")))
            .await
            .expect("append blocked by listener callback");
        assert!(appended);

        tokio::time::timeout(Duration::from_secs(2), async {
            store.update_with("a", |r| r.is_paid = true).await;
            store.remove("a").await;
        })
        .await
        .expect("update/remove blocked by listener callback");

        assert_eq!(*listener.seen_counts.lock().unwrap(), vec![1, 1, 0]);
    }
}
