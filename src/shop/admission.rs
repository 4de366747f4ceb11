//! 准入控制
//!
//! 候选从收件箱进入本地订单列表的唯一通道。入箱（`stage`）与准入/拒绝共用同一把闸门锁，
//! 保证某个 ID 在“写入本地”与“移出收件箱”之间不会被其它生产者重新放进收件箱。
//! 收件箱监听器与云端删除都在释放闸门之后执行，监听器中可以直接再调用准入。

use crate::shop::inbox::{InboxItem, InboxStore, Removed, TryAddOutcome};
use crate::shop::order::LocalOrderStore;
use crate::shop::remote::RemoteStore;
use crate::shop::types::{OrderCandidate, OrderRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

/// 准入结果
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    /// 本地列表中的订单
    pub record: OrderRecord,
    /// 本次是否真正新增（ID 已存在时为 false）
    pub newly_added: bool,
}

pub struct AdmissionController {
    orders: Arc<LocalOrderStore>,
    inbox: Arc<InboxStore>,
    remote: RwLock<Option<Arc<dyn RemoteStore>>>,
    gate: Mutex<()>,
}

impl AdmissionController {
    pub fn new(orders: Arc<LocalOrderStore>, inbox: Arc<InboxStore>) -> Self {
        Self {
            orders,
            inbox,
            remote: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// 设置（或清除）准入/拒绝后用于删除云端副本的云端实现
    ///
    /// 删除目标取自条目来源中记录的店铺 ID，而不是当前店铺 ID。
    pub async fn set_remote(&self, remote: Option<Arc<dyn RemoteStore>>) {
        *self.remote.write().await = remote;
    }

    /// 把一批候选放入收件箱（过滤本地已有与收件箱已有的 ID）
    pub async fn stage(&self, items: Vec<InboxItem>) -> TryAddOutcome {
        if items.is_empty() {
            return TryAddOutcome::default();
        }
        let outcome = {
            let _gate = self.gate.lock().await;
            let existing = self.orders.ids().await;
            self.inbox.try_add(items, &existing).await
        };
        self.inbox.announce_arrival(&outcome.added).await;
        outcome
    }

    /// 准入候选：校验补全 → 写入本地 → 移出收件箱 → 删除云端副本
    ///
    /// 对同一 ID 重复调用只会产生一条本地订单。
    pub async fn accept(&self, candidate: OrderCandidate) -> Admitted {
        let (admitted, staged) = {
            let _gate = self.gate.lock().await;
            let record = candidate.normalize();
            let id = record.id.clone();
            let newly_added = self.orders.append(record.clone()).await;
            let record = if newly_added {
                record
            } else {
                self.orders.get(&id).await.unwrap_or(record)
            };
            let staged = self.inbox.remove(&id).await;
            (
                Admitted {
                    record,
                    newly_added,
                },
                staged,
            )
        };

        if admitted.newly_added {
            info!("[Admission] ✅ 准入订单 {}", admitted.record.id);
        } else {
            debug!("[Admission] 订单 {} 已在本地，跳过写入", admitted.record.id);
        }
        if let Some(removed) = staged {
            self.finish_removal(&removed, true).await;
        }
        admitted
    }

    /// 按 ID 准入收件箱中的候选；收件箱中没有该 ID 时返回 None
    pub async fn accept_id(&self, id: &str) -> Option<Admitted> {
        let item = self.inbox.get(id).await?;
        Some(self.accept(item.candidate).await)
    }

    /// 准入收件箱中全部候选，返回新增的订单数
    pub async fn accept_all(&self) -> usize {
        let items = self.inbox.list().await;
        let mut added = 0;
        // 收件箱最新在前，倒序准入使本地列表保持到达顺序
        for item in items.into_iter().rev() {
            if self.accept(item.candidate).await.newly_added {
                added += 1;
            }
        }
        info!("[Admission] 批量准入完成，新增 {} 条", added);
        added
    }

    /// 拒绝候选：移出收件箱并删除云端副本，永不写入本地；返回收件箱中是否确有此条
    pub async fn reject(&self, id: &str) -> bool {
        let staged = {
            let _gate = self.gate.lock().await;
            self.inbox.remove(id).await
        };
        match staged {
            Some(removed) => {
                info!("[Admission] 🚫 拒绝候选 {}", id);
                self.finish_removal(&removed, true).await;
                true
            }
            None => {
                debug!("[Admission] 拒绝的候选 {} 不在收件箱中", id);
                false
            }
        }
    }

    /// 云端副本已被删除：移出该店铺对应 key 的云端来源条目，返回移出条数
    ///
    /// 不会删除云端，也不会触碰本地订单。
    pub async fn withdraw_remote(&self, store_id: &str, keys: &[String]) -> usize {
        let removed = {
            let _gate = self.gate.lock().await;
            let mut removed = Vec::new();
            for key in keys {
                let staged = self.inbox.get(key).await;
                let matches = staged
                    .is_some_and(|item| item.origin.remote_ref() == Some((store_id, key.as_str())));
                if !matches {
                    continue;
                }
                if let Some(r) = self.inbox.remove(key).await {
                    removed.push(r);
                }
            }
            removed
        };
        for r in removed.iter() {
            debug!("[Admission] 云端已移除 {}，同步移出收件箱", r.item.id());
            self.finish_removal(r, false).await;
        }
        removed.len()
    }

    /// 云端收件箱全量快照：移出该店铺已不在快照中的云端来源条目，再把快照入箱
    pub async fn replace_remote(&self, store_id: &str, items: Vec<InboxItem>) -> TryAddOutcome {
        let present: HashSet<String> = items.iter().map(|i| i.id().to_string()).collect();
        let (stale, outcome) = {
            let _gate = self.gate.lock().await;
            let mut stale = Vec::new();
            for item in self.inbox.list().await {
                if !item.origin.is_remote_of(store_id) || present.contains(item.id()) {
                    continue;
                }
                if let Some(r) = self.inbox.remove(item.id()).await {
                    stale.push(r);
                }
            }
            let existing = self.orders.ids().await;
            let outcome = self.inbox.try_add(items, &existing).await;
            (stale, outcome)
        };

        if !stale.is_empty() {
            info!("[Admission] 云端快照中已不存在的候选 {} 条，移出收件箱", stale.len());
        }
        // 快照之后又有新条目时，不再报告清空
        let emptied = stale.last().is_some_and(|r| r.emptied) && outcome.added.is_empty();
        if emptied {
            self.inbox.announce_emptied().await;
        }
        self.inbox.announce_arrival(&outcome.added).await;
        outcome
    }

    /// 闸门外的收尾：通知清空，必要时删除云端副本
    async fn finish_removal(&self, removed: &Removed, delete_remote: bool) {
        if removed.emptied {
            self.inbox.announce_emptied().await;
        }
        if delete_remote {
            self.delete_remote_copy(&removed.item).await;
        }
    }

    /// 云端来源的条目处理后删除云端副本；失败只记日志
    async fn delete_remote_copy(&self, item: &InboxItem) {
        let Some((store_id, key)) = item.origin.remote_ref() else {
            return;
        };
        let remote = self.remote.read().await.clone();
        let Some(remote) = remote else {
            debug!("[Admission] 未配置云端，跳过删除 {}", key);
            return;
        };
        if let Err(e) = remote.delete_order(store_id, key).await {
            error!("[Admission] ❌ 删除云端订单 {}/{} 失败: {:#}", store_id, key, e);
        }
    }
}
