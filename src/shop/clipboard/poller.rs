//! 剪贴板轮询器
//!
//! 前台时每隔固定间隔读取一次共享通道，回到前台时立刻补一次。
//! 只记住上一次处理过的原文（单槽缓存）：同一段文本不会被重复处理，
//! 但在 A → B → A 的情况下 A 会再次被处理，由收件箱与本地订单去重兜底。

use crate::shop::clipboard::source::ClipboardSource;
use crate::shop::serialization::{decode_clipboard_payload, extract_envelope};
use crate::shop::types::OrderCandidate;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 接收解码出的候选
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    async fn on_clipboard_orders(&self, candidates: Vec<OrderCandidate>);
}

pub struct ClipboardPoller {
    source: Arc<dyn ClipboardSource>,
    last_seen: Mutex<Option<String>>,
}

impl ClipboardPoller {
    pub fn new(source: Arc<dyn ClipboardSource>) -> Self {
        Self {
            source,
            last_seen: Mutex::new(None),
        }
    }

    /// 读取并处理一次；读取失败或内容不是载荷时返回空列表
    pub async fn poll_once(&self) -> Vec<OrderCandidate> {
        match self.source.read_text().await {
            Ok(Some(text)) => self.process_text(&text),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!("[Clipboard] 读取剪贴板失败: {:#}", e);
                Vec::new()
            }
        }
    }

    /// 处理一段原文
    ///
    /// 只要包含载荷标记就会记入缓存，即使随后解码失败，
    /// 避免每个周期都对同一段坏数据重复解码。
    pub fn process_text(&self, text: &str) -> Vec<OrderCandidate> {
        if extract_envelope(text).is_none() {
            return Vec::new();
        }

        {
            let mut last = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
            if last.as_deref() == Some(text) {
                return Vec::new();
            }
            *last = Some(text.to_string());
        }

        match decode_clipboard_payload(text) {
            Ok(candidates) => {
                info!("[Clipboard] 📋 识别到载荷，候选 {} 条", candidates.len());
                candidates
            }
            Err(e) => {
                warn!("[Clipboard] ⚠️ 载荷解码失败，整体丢弃: {}", e);
                Vec::new()
            }
        }
    }

    /// 启动后台轮询
    ///
    /// `foreground` 为 false 时暂停，重新变为 true 时立即轮询一次；发送端关闭后任务结束。
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut foreground: watch::Receiver<bool>,
        sink: Arc<dyn ClipboardSink>,
    ) -> PollerHandle {
        let task = tokio::spawn(async move {
            info!("[Clipboard] 🔄 启动剪贴板轮询，间隔 {:?}", interval);
            loop {
                while !*foreground.borrow_and_update() {
                    debug!("[Clipboard] 进入后台，暂停轮询");
                    if foreground.changed().await.is_err() {
                        return;
                    }
                }

                let candidates = self.poll_once().await;
                if !candidates.is_empty() {
                    sink.on_clipboard_orders(candidates).await;
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = foreground.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        PollerHandle { task }
    }
}

/// 轮询任务句柄，drop 时停止轮询
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        info!("[Clipboard] ⏹️ 停止剪贴板轮询");
        self.task.abort();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::serialization::encode_clipboard_payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 内容可随时替换的假剪贴板
    struct FakeClipboard {
        text: Mutex<Option<String>>,
        fail: bool,
    }

    impl FakeClipboard {
        fn new(text: Option<String>) -> Self {
            Self {
                text: Mutex::new(text),
                fail: false,
            }
        }

        fn set(&self, text: &str) {
            *self.text.lock().unwrap() = Some(text.to_string());
        }
    }

    #[async_trait]
    impl ClipboardSource for FakeClipboard {
        async fn read_text(&self) -> anyhow::Result<Option<String>> {
            if self.fail {
                anyhow::bail!("permission denied");
            }
            Ok(self.text.lock().unwrap().clone())
        }
    }

    fn payload(id: &str) -> String {
        encode_clipboard_payload(&[OrderCandidate {
            id: Some(id.to_string()),
            buyer_name: Some("Kim".into()),
            ..Default::default()
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn same_text_is_processed_once() {
        let text = format!("买家发来的：{}", payload("a"));
        let clip = Arc::new(FakeClipboard::new(Some(text.clone())));
        let poller = ClipboardPoller::new(clip.clone());

        assert_eq!(poller.poll_once().await.len(), 1);
        assert!(poller.poll_once().await.is_empty());

        clip.set(&payload("b"));
        assert_eq!(poller.poll_once().await[0].id(), Some("b"));

        // 单槽缓存：切回之前的文本会再次得到候选
        clip.set(&text);
        assert_eq!(poller.poll_once().await.len(), 1);
    }

    #[tokio::test]
    async fn non_payload_and_broken_payload_yield_nothing() {
        let poller = ClipboardPoller::new(Arc::new(FakeClipboard::new(None)));
        assert!(poller.poll_once().await.is_empty());
        assert!(poller.process_text("普通聊天内容").is_empty());
        assert!(poller.process_text("RENTO_DATA::%%%not-base64%%%::END").is_empty());

        let failing = ClipboardPoller::new(Arc::new(FakeClipboard {
            text: Mutex::new(None),
            fail: true,
        }));
        assert!(failing.poll_once().await.is_empty());
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl ClipboardSink for CountingSink {
        async fn on_clipboard_orders(&self, candidates: Vec<OrderCandidate>) {
            self.0.fetch_add(candidates.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn background_poller_delivers_only_in_foreground() {
        let clip = Arc::new(FakeClipboard::new(Some(payload("a"))));
        let poller = Arc::new(ClipboardPoller::new(clip.clone()));
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let (tx, rx) = watch::channel(false);

        let handle = poller.spawn(Duration::from_millis(10), rx, sink.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        clip.set(&payload("b"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);

        assert!(handle.is_active());
        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn stopped_poller_delivers_nothing_more() {
        let clip = Arc::new(FakeClipboard::new(Some(payload("a"))));
        let poller = Arc::new(ClipboardPoller::new(clip.clone()));
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let (_tx, rx) = watch::channel(true);

        let handle = poller.spawn(Duration::from_millis(10), rx, sink.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        handle.stop();
        clip.set(&payload("b"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }
}
