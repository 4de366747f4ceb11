//! 代购端客户端
//!
//! 进程级上下文：持有本地订单存储、收件箱、准入控制器以及各路入箱适配器
//! （云端订阅、剪贴板轮询、AI 解析、手动录入）。不使用全局状态，
//! 调用方创建一个 `RentoClient`，`init` 后按需 `start`，退出前 `shutdown`。

use crate::shop::admission::{Admitted, AdmissionController};
use crate::shop::assistant::AssistantDraft;
use crate::shop::clipboard::poller::DEFAULT_POLL_INTERVAL;
use crate::shop::clipboard::{ClipboardPoller, ClipboardSink, ClipboardSource, PollerHandle};
use crate::shop::db::create_sqlite_pool_with_migration;
use crate::shop::inbox::{
    CandidateOrigin, EmptyInboxListener, InboxItem, InboxListener, InboxStore, TryAddOutcome,
};
use crate::shop::order::{EmptyOrderListener, LocalOrderStore, OrderDao, OrderListener};
use crate::shop::pricing::ExchangeRates;
use crate::shop::remote::{
    FormSettings, HttpRemoteStore, RemoteConfig, RemoteEventSink, RemoteStore, SubscriptionHandle,
};
use crate::shop::serialization::{
    decode_clipboard_payload, encode_clipboard_payload, generate_store_id,
};
use crate::shop::share_link::ShareLink;
use crate::shop::stats::OrderStats;
use crate::shop::types::{OrderCandidate, OrderPatch, OrderRecord, OrderStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 本地数据库 URL
    pub db_url: String,
    /// 云端连接配置（不配置时只使用剪贴板/手动录入）
    pub remote: Option<RemoteConfig>,
    /// 指定店铺 ID（不指定时从本地读取，首次运行自动生成）
    pub store_id: Option<String>,
    /// 剪贴板轮询间隔
    pub clipboard_poll_interval: Duration,
    /// 汇率
    pub rates: ExchangeRates,
}

impl ClientConfig {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            remote: None,
            store_id: None,
            clipboard_poll_interval: DEFAULT_POLL_INTERVAL,
            rates: ExchangeRates::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("sqlite://rento.db?mode=rwc")
    }
}

/// 代购端客户端
pub struct RentoClient {
    config: ClientConfig,
    store_id: String,
    dao: Option<OrderDao>,
    orders: Option<Arc<LocalOrderStore>>,
    inbox: Option<Arc<InboxStore>>,
    admission: Option<Arc<AdmissionController>>,
    remote: Option<Arc<dyn RemoteStore>>,
    clipboard: Option<Arc<dyn ClipboardSource>>,
    // 运行中的订阅（每个店铺 ID 只保留一组）
    subscriptions: Vec<SubscriptionHandle>,
    poller: Option<PollerHandle>,
    foreground: watch::Sender<bool>,
    order_listener: Arc<dyn OrderListener>,
    inbox_listener: Arc<dyn InboxListener>,
}

impl RentoClient {
    pub fn new(config: ClientConfig) -> Self {
        let (foreground, _) = watch::channel(true);
        Self {
            config,
            store_id: String::new(),
            dao: None,
            orders: None,
            inbox: None,
            admission: None,
            remote: None,
            clipboard: None,
            subscriptions: Vec::new(),
            poller: None,
            foreground,
            order_listener: Arc::new(EmptyOrderListener),
            inbox_listener: Arc::new(EmptyInboxListener),
        }
    }

    /// 设置订单监听器（需在 `init` 之前调用）
    pub fn set_order_listener(&mut self, listener: Arc<dyn OrderListener>) {
        self.order_listener = listener;
    }

    /// 设置收件箱监听器（需在 `init` 之前调用）
    pub fn set_inbox_listener(&mut self, listener: Arc<dyn InboxListener>) {
        self.inbox_listener = listener;
    }

    /// 设置剪贴板来源，`start` 时启动轮询
    pub fn set_clipboard_source(&mut self, source: Arc<dyn ClipboardSource>) {
        self.clipboard = Some(source);
    }

    /// 替换云端实现（默认根据 `ClientConfig::remote` 创建 HTTP 实现）
    pub async fn set_remote_store(&mut self, remote: Arc<dyn RemoteStore>) {
        self.remote = Some(remote);
        self.sync_remote_target().await;
    }

    /// 打开本地数据库、加载订单、确定店铺 ID
    pub async fn init(&mut self) -> Result<()> {
        let pool = create_sqlite_pool_with_migration(&self.config.db_url).await?;
        let dao = OrderDao::new(pool);

        self.store_id = match self.config.store_id.clone() {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => match dao.get_store_id().await? {
                Some(id) => id,
                None => {
                    let id = generate_store_id();
                    dao.save_store_id(&id).await?;
                    info!("[Client] 🆕 首次运行，生成店铺 ID {}", id);
                    id
                }
            },
        };

        let orders = Arc::new(
            LocalOrderStore::open(
                dao.clone(),
                self.order_listener.clone(),
                self.config.rates.cost_rate,
            )
            .await,
        );
        let inbox = Arc::new(InboxStore::new(self.inbox_listener.clone()));
        let admission = Arc::new(AdmissionController::new(orders.clone(), inbox.clone()));

        if self.remote.is_none() {
            if let Some(remote_config) = self.config.remote.clone() {
                self.remote = Some(Arc::new(HttpRemoteStore::new(remote_config)?));
            }
        }

        self.dao = Some(dao);
        self.orders = Some(orders);
        self.inbox = Some(inbox);
        self.admission = Some(admission);
        self.sync_remote_target().await;

        info!("[Client] ✅ 初始化完成，店铺 ID: {}", self.store_id);
        Ok(())
    }

    /// 启动入箱适配器：云端订阅与剪贴板轮询
    ///
    /// 重复调用会先停掉旧的订阅，保证同一时间只有一组订阅。
    pub async fn start(&mut self) -> Result<()> {
        let sink = Arc::new(self.intake_sink()?);
        self.stop_adapters();

        if let Some(remote) = self.remote.clone() {
            let inbox_sub = remote
                .subscribe_inbox(&self.store_id, sink.clone())
                .await
                .context("订阅云端收件箱失败")?;
            let settings_sub = remote
                .subscribe_form_settings(&self.store_id, sink.clone())
                .await
                .context("订阅表单设置失败")?;
            self.subscriptions.push(inbox_sub);
            self.subscriptions.push(settings_sub);
            info!("[Client] 📡 已订阅店铺 {} 的云端收件箱", self.store_id);
        } else {
            debug!("[Client] 未配置云端，跳过订阅");
        }

        if let Some(source) = self.clipboard.clone() {
            let poller = Arc::new(ClipboardPoller::new(source));
            self.poller = Some(poller.spawn(
                self.config.clipboard_poll_interval,
                self.foreground.subscribe(),
                sink,
            ));
        }
        Ok(())
    }

    /// 停止所有适配器（本地数据已在每次修改时落盘）
    pub fn shutdown(&mut self) {
        self.stop_adapters();
        info!("[Client] 👋 已停止");
    }

    /// 更换店铺 ID：旧 ID 的云端收件箱不再接收；已启动时用新 ID 重新订阅
    pub async fn rotate_store_id(&mut self) -> Result<String> {
        let dao = self
            .dao
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端未初始化"))?;
        let new_id = generate_store_id();
        dao.save_store_id(&new_id).await?;
        info!("[Client] 🔁 店铺 ID {} -> {}", self.store_id, new_id);

        self.store_id = new_id.clone();
        self.sync_remote_target().await;
        if !self.subscriptions.is_empty() || self.poller.is_some() {
            self.start().await?;
        }
        Ok(new_id)
    }

    /// 切换前台/后台；剪贴板轮询只在前台进行，回到前台时立即轮询
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.send_replace(foreground);
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ---- 入箱 ----

    /// 把候选放入收件箱（与准入共用闸门）
    pub async fn ingest(&self, items: Vec<InboxItem>) -> Result<TryAddOutcome> {
        Ok(self.admission()?.stage(items).await)
    }

    /// 手动粘贴的剪贴板载荷
    pub async fn ingest_clipboard_text(&self, text: &str) -> Result<TryAddOutcome> {
        let candidates = decode_clipboard_payload(text)?;
        let items = candidates
            .into_iter()
            .map(|c| InboxItem::new(c, CandidateOrigin::Clipboard))
            .collect();
        self.ingest(items).await
    }

    /// AI 解析结果放入收件箱，由管理员确认后准入
    pub async fn stage_assistant_reply(&self, reply: &str) -> Result<TryAddOutcome> {
        let draft = AssistantDraft::parse(reply)?;
        self.ingest(vec![InboxItem::new(
            draft.into_candidate(),
            CandidateOrigin::Assistant,
        )])
        .await
    }

    /// 手动录入：不经过收件箱直接准入；未填应收金额时按报价汇率计算
    ///
    /// 收件箱中已有同 ID 的候选时按准入处理（移出收件箱并删除云端副本）。
    pub async fn add_manual_order(&self, mut candidate: OrderCandidate) -> Result<OrderRecord> {
        let admission = self.admission()?;
        if candidate.calculated_price.is_none() {
            if let Some(unit_cost) = candidate.unit_cost {
                let quantity = candidate
                    .requested_quantity
                    .filter(|q| *q >= 1.0)
                    .map(|q| q.floor() as u32)
                    .unwrap_or(1);
                candidate.calculated_price = Some(self.config.rates.quote(unit_cost, quantity));
            }
        }
        let admitted = admission.accept(candidate).await;
        if !admitted.newly_added {
            warn!("[Client] ⚠️ 手动录入的订单 {} 已存在", admitted.record.id);
        }
        Ok(admitted.record)
    }

    // ---- 准入 ----

    pub async fn accept(&self, candidate: OrderCandidate) -> Result<Admitted> {
        Ok(self.admission()?.accept(candidate).await)
    }

    pub async fn accept_id(&self, id: &str) -> Result<Option<Admitted>> {
        Ok(self.admission()?.accept_id(id).await)
    }

    pub async fn accept_all(&self) -> Result<usize> {
        Ok(self.admission()?.accept_all().await)
    }

    pub async fn reject(&self, id: &str) -> Result<bool> {
        Ok(self.admission()?.reject(id).await)
    }

    // ---- 本地订单 ----

    pub async fn list_orders(&self) -> Result<Vec<OrderRecord>> {
        Ok(self.orders()?.snapshot().await)
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<OrderRecord>> {
        Ok(self.orders()?.get(id).await)
    }

    pub async fn update_order(&self, id: &str, patch: &OrderPatch) -> Result<Option<OrderRecord>> {
        Ok(self.orders()?.upsert_fields(id, patch).await)
    }

    pub async fn set_status(&self, id: &str, status: OrderStatus) -> Result<Option<OrderRecord>> {
        let patch = OrderPatch {
            status: Some(status),
            ..Default::default()
        };
        self.update_order(id, &patch).await
    }

    /// 状态按 pending → purchased → shipped → arrived → pending 循环
    pub async fn advance_status(&self, id: &str) -> Result<Option<OrderRecord>> {
        Ok(self
            .orders()?
            .update_with(id, OrderRecord::advance_status)
            .await)
    }

    pub async fn toggle_paid(&self, id: &str) -> Result<Option<OrderRecord>> {
        Ok(self.orders()?.update_with(id, |r| r.is_paid = !r.is_paid).await)
    }

    pub async fn delete_order(&self, id: &str) -> Result<bool> {
        Ok(self.orders()?.remove(id).await)
    }

    pub async fn stats(&self) -> Result<OrderStats> {
        Ok(self.orders()?.stats().await)
    }

    // ---- 收件箱 ----

    pub async fn inbox_items(&self) -> Result<Vec<InboxItem>> {
        Ok(self.inbox()?.list().await)
    }

    // ---- 分享 ----

    /// 生成给买家的分享链接
    pub fn share_link(&self, base_url: &str) -> Result<String> {
        let remote = self
            .config
            .remote
            .clone()
            .ok_or_else(|| anyhow::anyhow!("未配置云端，无法生成分享链接"))?;
        Ok(ShareLink::new(remote, self.store_id.clone()).encode(base_url)?)
    }

    /// 把本地订单导出为剪贴板载荷（`ids` 为空时导出全部）
    pub async fn export_payload(&self, ids: &[String]) -> Result<String> {
        let orders = self.orders()?.snapshot().await;
        let selected: Vec<OrderCandidate> = orders
            .into_iter()
            .filter(|r| ids.is_empty() || ids.contains(&r.id))
            .map(OrderCandidate::from)
            .collect();
        if selected.is_empty() {
            return Err(anyhow::anyhow!("没有可导出的订单"));
        }
        Ok(encode_clipboard_payload(&selected)?)
    }

    // ---- 表单设置 ----

    pub async fn get_form_settings(&self) -> Result<FormSettings> {
        self.remote()?.get_form_settings(&self.store_id).await
    }

    pub async fn set_form_settings(&self, settings: &FormSettings) -> Result<()> {
        self.remote()?
            .set_form_settings(&self.store_id, settings)
            .await
    }

    // ---- 内部 ----

    fn orders(&self) -> Result<&Arc<LocalOrderStore>> {
        self.orders
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端未初始化"))
    }

    fn inbox(&self) -> Result<&Arc<InboxStore>> {
        self.inbox
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端未初始化"))
    }

    fn admission(&self) -> Result<&Arc<AdmissionController>> {
        self.admission
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端未初始化"))
    }

    fn remote(&self) -> Result<&Arc<dyn RemoteStore>> {
        self.remote
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("未配置云端"))
    }

    fn intake_sink(&self) -> Result<IntakeSink> {
        Ok(IntakeSink {
            store_id: self.store_id.clone(),
            admission: self.admission()?.clone(),
            inbox_listener: self.inbox_listener.clone(),
        })
    }

    async fn sync_remote_target(&self) {
        if let Some(admission) = &self.admission {
            admission.set_remote(self.remote.clone()).await;
        }
    }

    fn stop_adapters(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }
}

impl Drop for RentoClient {
    fn drop(&mut self) {
        self.stop_adapters();
    }
}

/// 买家端：通过分享链接把订单提交到代购的云端收件箱，返回云端 key
pub async fn submit_order(share_link: &str, candidate: &OrderCandidate) -> Result<String> {
    let link = ShareLink::decode(share_link)?;
    let remote = HttpRemoteStore::new(link.remote)?;
    submit_order_with(&remote, &link.store_id, candidate).await
}

/// 使用指定云端实现提交订单；表单未开放时仍然提交，只记录警告
pub async fn submit_order_with(
    remote: &dyn RemoteStore,
    store_id: &str,
    candidate: &OrderCandidate,
) -> Result<String> {
    match remote.get_form_settings(store_id).await {
        Ok(settings) if !settings.is_form_active => {
            warn!("[Client] ⚠️ 店铺 {} 的表单当前未开放", store_id)
        }
        Ok(_) => {}
        Err(e) => debug!("[Client] 读取表单设置失败: {:#}", e),
    }
    let key = remote.push_order(store_id, candidate).await?;
    info!("[Client] 📤 订单已提交，云端 key: {}", key);
    Ok(key)
}

/// 各路适配器的汇入点：全部经过准入控制器
///
/// 每组订阅对应一个店铺 ID，云端条目的来源记录该 ID。
struct IntakeSink {
    store_id: String,
    admission: Arc<AdmissionController>,
    inbox_listener: Arc<dyn InboxListener>,
}

impl IntakeSink {
    fn remote_items(&self, orders: Vec<(String, OrderCandidate)>) -> Vec<InboxItem> {
        orders
            .into_iter()
            .map(|(key, mut candidate)| {
                candidate.id = Some(key.clone());
                InboxItem::new(candidate, CandidateOrigin::remote(&self.store_id, key))
            })
            .collect()
    }
}

#[async_trait]
impl RemoteEventSink for IntakeSink {
    async fn on_remote_orders(&self, orders: Vec<(String, OrderCandidate)>) {
        let outcome = self.admission.stage(self.remote_items(orders)).await;
        debug!("[Client] 云端推送入箱 {} 条", outcome.added_count);
    }

    async fn on_remote_removed(&self, keys: Vec<String>) {
        let withdrawn = self.admission.withdraw_remote(&self.store_id, &keys).await;
        debug!("[Client] 云端撤回 {} 条", withdrawn);
    }

    async fn on_remote_snapshot(&self, orders: Vec<(String, OrderCandidate)>) {
        let items = self.remote_items(orders);
        let outcome = self.admission.replace_remote(&self.store_id, items).await;
        debug!("[Client] 云端快照入箱 {} 条", outcome.added_count);
    }

    async fn on_form_settings(&self, settings: FormSettings) {
        if let Ok(json) = serde_json::to_string(&settings) {
            self.inbox_listener.on_form_settings_changed(json).await;
        }
    }
}

#[async_trait]
impl ClipboardSink for IntakeSink {
    async fn on_clipboard_orders(&self, candidates: Vec<OrderCandidate>) {
        let items = candidates
            .into_iter()
            .map(|c| InboxItem::new(c, CandidateOrigin::Clipboard))
            .collect();
        let outcome = self.admission.stage(items).await;
        debug!("[Client] 剪贴板入箱 {} 条", outcome.added_count);
    }
}
