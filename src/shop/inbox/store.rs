//! 收件箱暂存区
//!
//! `try_add` 是整个系统唯一必须互斥的临界区：云端推送与剪贴板轮询可能同时送来同一个 ID，
//! 只允许其中一个进入收件箱。
//!
//! `try_add` / `remove` 只改内存，不触发监听器；调用方在释放准入闸门后
//! 再调用 `announce_arrival` / `announce_emptied`。

use crate::shop::inbox::listener::InboxListener;
use crate::shop::types::OrderCandidate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 候选来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CandidateOrigin {
    /// 云端收件箱（准入/拒绝后需要删除云端副本）
    ///
    /// 记录收到时所在的店铺 ID，店铺 ID 轮换后仍能删除旧店铺下的副本。
    Remote {
        #[serde(rename = "storeId")]
        store_id: String,
        key: String,
    },
    /// 剪贴板载荷
    Clipboard,
    /// AI 解析结果
    Assistant,
}

impl CandidateOrigin {
    pub fn remote(store_id: impl Into<String>, key: impl Into<String>) -> Self {
        CandidateOrigin::Remote {
            store_id: store_id.into(),
            key: key.into(),
        }
    }

    /// 云端副本的位置 `(store_id, key)`（仅云端来源有）
    pub fn remote_ref(&self) -> Option<(&str, &str)> {
        match self {
            CandidateOrigin::Remote { store_id, key } => {
                Some((store_id.as_str(), key.as_str()))
            }
            _ => None,
        }
    }

    /// 是否来自指定店铺的云端收件箱
    pub fn is_remote_of(&self, store_id: &str) -> bool {
        self.remote_ref().is_some_and(|(sid, _)| sid == store_id)
    }
}

/// 收件箱条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub candidate: OrderCandidate,
    pub origin: CandidateOrigin,
    /// 进入收件箱的时间（毫秒）
    pub received_at: i64,
}

impl InboxItem {
    pub fn new(candidate: OrderCandidate, origin: CandidateOrigin) -> Self {
        Self {
            candidate,
            origin,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> &str {
        self.candidate.id().unwrap_or_default()
    }
}

/// `try_add` 的结果：只包含真正新增的条目
#[derive(Debug, Clone, Default)]
pub struct TryAddOutcome {
    pub added: Vec<InboxItem>,
    pub added_count: usize,
}

/// `remove` 的结果
#[derive(Debug, Clone)]
pub struct Removed {
    pub item: InboxItem,
    /// 移除后收件箱是否为空
    pub emptied: bool,
}

/// 收件箱（进程内暂存，不落盘）
pub struct InboxStore {
    items: Mutex<Vec<InboxItem>>,
    listener: Arc<dyn InboxListener>,
}

impl InboxStore {
    pub fn new(listener: Arc<dyn InboxListener>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            listener,
        }
    }

    /// 尝试加入一批候选
    ///
    /// 过滤掉：ID 已在收件箱中的、ID 在 `existing_ids`（本地订单）中的、同一批次内重复的。
    /// 新条目按到达先后插入到最前（最新的在最前面）。
    pub async fn try_add(
        &self,
        candidates: Vec<InboxItem>,
        existing_ids: &HashSet<String>,
    ) -> TryAddOutcome {
        let added = {
            let mut items = self.items.lock().await;
            let mut seen: HashSet<String> = items.iter().map(|i| i.id().to_string()).collect();

            let mut added = Vec::new();
            for mut item in candidates {
                let id = item.candidate.ensure_id().to_string();
                if existing_ids.contains(&id) {
                    debug!("[Inbox] 候选 {} 已是本地订单，跳过", id);
                    continue;
                }
                if !seen.insert(id.clone()) {
                    debug!("[Inbox] 候选 {} 已在收件箱中，跳过", id);
                    continue;
                }
                added.push(item);
            }

            for item in added.iter() {
                items.insert(0, item.clone());
            }
            added
        };

        if !added.is_empty() {
            info!("[Inbox] 📥 新增候选 {} 条", added.len());
        }

        TryAddOutcome {
            added_count: added.len(),
            added,
        }
    }

    /// 移除一条候选（不存在时返回 None）
    pub async fn remove(&self, id: &str) -> Option<Removed> {
        let mut items = self.items.lock().await;
        let pos = items.iter().position(|i| i.id() == id)?;
        let item = items.remove(pos);
        debug!("[Inbox] 移除候选 {}", id);
        Some(Removed {
            item,
            emptied: items.is_empty(),
        })
    }

    /// 通知监听器有新候选到达
    pub async fn announce_arrival(&self, added: &[InboxItem]) {
        if added.is_empty() {
            return;
        }
        if let Ok(json) = serde_json::to_string(added) {
            self.listener.on_inbox_arrival(json).await;
        }
    }

    /// 通知监听器收件箱已清空
    pub async fn announce_emptied(&self) {
        info!("[Inbox] 📭 收件箱已清空");
        self.listener.on_inbox_emptied().await;
    }

    pub async fn get(&self, id: &str) -> Option<InboxItem> {
        self.items.lock().await.iter().find(|i| i.id() == id).cloned()
    }

    /// 当前收件箱内容（最新在前）
    pub async fn list(&self) -> Vec<InboxItem> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::inbox::listener::EmptyInboxListener;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: &str) -> InboxItem {
        InboxItem::new(
            OrderCandidate {
                id: Some(id.to_string()),
                ..Default::default()
            },
            CandidateOrigin::Clipboard,
        )
    }

    #[tokio::test]
    async fn filters_existing_duplicate_and_in_batch_ids() {
        let inbox = InboxStore::new(Arc::new(EmptyInboxListener));
        let existing: HashSet<String> = ["local".to_string()].into_iter().collect();

        let first = inbox
            .try_add(vec![item("a"), item("local"), item("a"), item("b")], &existing)
            .await;
        assert_eq!(first.added_count, 2);

        let second = inbox.try_add(vec![item("b"), item("c")], &existing).await;
        assert_eq!(second.added_count, 1);
        assert_eq!(second.added[0].id(), "c");

        let ids: Vec<String> = inbox.list().await.iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn candidates_without_id_get_one() {
        let inbox = InboxStore::new(Arc::new(EmptyInboxListener));
        let outcome = inbox
            .try_add(
                vec![InboxItem::new(OrderCandidate::default(), CandidateOrigin::Assistant)],
                &HashSet::new(),
            )
            .await;
        assert_eq!(outcome.added_count, 1);
        assert!(!outcome.added[0].id().is_empty());
    }

    #[tokio::test]
    async fn concurrent_producers_admit_each_id_once() {
        let inbox = Arc::new(InboxStore::new(Arc::new(EmptyInboxListener)));
        let existing: Arc<HashSet<String>> =
            Arc::new(["dup-0".to_string()].into_iter().collect());

        let mut handles = Vec::new();
        for producer in 0..8 {
            let inbox = inbox.clone();
            let existing = existing.clone();
            handles.push(tokio::spawn(async move {
                let batch = (0..20)
                    .map(|n| {
                        let origin = if producer % 2 == 0 {
                            CandidateOrigin::remote("store_1", format!("dup-{}", n))
                        } else {
                            CandidateOrigin::Clipboard
                        };
                        InboxItem::new(
                            OrderCandidate {
                                id: Some(format!("dup-{}", n)),
                                ..Default::default()
                            },
                            origin,
                        )
                    })
                    .collect();
                inbox.try_add(batch, &existing).await.added_count
            }));
        }

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 19);

        let items = inbox.list().await;
        let distinct: HashSet<&str> = items.iter().map(|i| i.id()).collect();
        assert_eq!(items.len(), 19);
        assert_eq!(distinct.len(), 19);
        assert!(!distinct.contains("dup-0"));
    }

    struct CountingListener {
        arrivals: AtomicUsize,
        emptied: AtomicUsize,
    }

    #[async_trait]
    impl InboxListener for CountingListener {
        async fn on_inbox_arrival(&self, items_json: String) {
            let items: Vec<InboxItem> = serde_json::from_str(&items_json).unwrap();
            self.arrivals.fetch_add(items.len(), Ordering::SeqCst);
        }
        async fn on_inbox_emptied(&self) {
            self.emptied.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_form_settings_changed(&self, _settings_json: String) {}
    }

    #[tokio::test]
    async fn side_effects_fire_only_when_announced() {
        let listener = Arc::new(CountingListener {
            arrivals: AtomicUsize::new(0),
            emptied: AtomicUsize::new(0),
        });
        let inbox = InboxStore::new(listener.clone());

        let first = inbox.try_add(vec![item("a"), item("b")], &HashSet::new()).await;
        let again = inbox.try_add(vec![item("a")], &HashSet::new()).await;
        assert_eq!(listener.arrivals.load(Ordering::SeqCst), 0);
        inbox.announce_arrival(&first.added).await;
        inbox.announce_arrival(&again.added).await;
        assert_eq!(listener.arrivals.load(Ordering::SeqCst), 2);

        assert!(inbox.remove("missing").await.is_none());
        assert!(!inbox.remove("a").await.unwrap().emptied);
        assert!(inbox.remove("b").await.unwrap().emptied);
        assert!(inbox.remove("b").await.is_none());
        assert_eq!(listener.emptied.load(Ordering::SeqCst), 0);
        assert!(inbox.is_empty().await);
    }

    #[test]
    fn remote_origin_keeps_its_store_id() {
        let origin = CandidateOrigin::remote("store_old", "-k1");
        assert_eq!(origin.remote_ref(), Some(("store_old", "-k1")));
        assert!(origin.is_remote_of("store_old"));
        assert!(!origin.is_remote_of("store_new"));
        assert!(!CandidateOrigin::Clipboard.is_remote_of("store_old"));

        let json = serde_json::to_value(&origin).unwrap();
        assert_eq!(json["kind"], "remote");
        assert_eq!(json["storeId"], "store_old");
    }
}
