//! Rento 代购端 CLI
//!
//! 非交互式 CLI：`watch` 启动云端订阅与剪贴板轮询并输出收件箱动态，
//! 其余子命令直接读写本地订单。

use anyhow::Result;
use clap::{Parser, Subcommand};
use rento_sdk_core_rust::{
    submit_order, ClientConfig, CommandClipboard, ExchangeRates, FileClipboard, FormSettings,
    InboxItem, InboxListener, OrderCandidate, OrderListener, OrderRecord, OrderStatus,
    RemoteConfig, RentoClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Rento 代购端 CLI
#[derive(Parser, Debug)]
#[command(name = "rento-cli")]
#[command(about = "Rento 代购订单收件箱 - 接收、审核与管理买家订单", long_about = None)]
struct Args {
    /// 本地数据库 URL
    #[arg(long, default_value = "sqlite://rento.db?mode=rwc")]
    db_url: String,

    /// 云端实时数据库地址（不填则只使用剪贴板/手动录入）
    #[arg(long)]
    database_url: Option<String>,

    /// 云端访问凭证（作为 `auth` 参数附加到请求）
    #[arg(long)]
    auth_token: Option<String>,

    /// 指定店铺 ID（默认读取本地保存的 ID）
    #[arg(long)]
    store_id: Option<String>,

    /// 成本汇率（外币 → 本币）
    #[arg(long, default_value = "0.21")]
    cost_rate: f64,

    /// 报价汇率（外币 → 本币）
    #[arg(long, default_value = "0.25")]
    sell_rate: f64,

    /// 日志级别（默认: info,rento_sdk_core_rust=debug）
    #[arg(long, default_value = "info,rento_sdk_core_rust=debug")]
    log_level: String,

    /// 日志文件
    #[arg(long, default_value = "rento.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动云端订阅与剪贴板轮询，输出收件箱动态
    Watch {
        /// 新候选到达后自动准入
        #[arg(long)]
        auto_accept: bool,

        /// 运行时长（秒），0 表示持续运行
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// 读取剪贴板的命令（默认按平台选择 pbpaste / xclip）
        #[arg(long)]
        clipboard_cmd: Option<String>,

        /// 以文本文件代替系统剪贴板
        #[arg(long, conflicts_with = "clipboard_cmd")]
        clipboard_file: Option<PathBuf>,

        /// 不轮询剪贴板
        #[arg(long)]
        no_clipboard: bool,

        /// 剪贴板轮询间隔（毫秒）
        #[arg(long, default_value = "2000")]
        poll_interval_ms: u64,
    },
    /// 列出本地订单
    List,
    /// 手动录入订单
    Add {
        #[arg(long)]
        buyer: Option<String>,
        #[arg(long)]
        product: Option<String>,
        /// 外币单价
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        quantity: Option<u32>,
        /// 应收金额（不填按报价汇率计算）
        #[arg(long)]
        charge: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// 统计汇总
    Stats,
    /// 删除订单
    Delete { id: String },
    /// 设置订单状态（不指定状态时切换到下一个）
    SetStatus {
        id: String,
        /// pending / purchased / shipped / arrived
        status: Option<OrderStatus>,
    },
    /// 切换付款状态
    TogglePaid { id: String },
    /// 生成给买家的分享链接
    ShareLink {
        #[arg(default_value = "https://rento.app/")]
        base_url: String,
    },
    /// 更换店铺 ID（旧链接失效）
    RotateStoreId,
    /// 把订单导出为剪贴板载荷（不指定 ID 时导出全部）
    ExportPayload { ids: Vec<String> },
    /// 买家端：通过分享链接提交订单
    Submit {
        /// 代购提供的分享链接
        #[arg(long)]
        link: String,
        #[arg(long)]
        buyer: Option<String>,
        #[arg(long)]
        product: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        quantity: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// 查看或修改买家表单设置
    Form {
        /// 开放/关闭表单
        #[arg(long)]
        active: Option<bool>,
        /// 截止时间
        #[arg(long)]
        deadline: Option<String>,
    },
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str, log_path: &Path) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| anyhow::anyhow!("无法创建日志文件 {}: {}", log_path.display(), e))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!(
        "[CLI] 📝 日志已同时输出到控制台和文件: {}",
        log_path.display()
    );
    Ok(())
}

/// 收件箱事件转发到主循环
struct CliInboxListener {
    arrivals: mpsc::UnboundedSender<Vec<InboxItem>>,
}

#[async_trait::async_trait]
impl InboxListener for CliInboxListener {
    async fn on_inbox_arrival(&self, items_json: String) {
        match serde_json::from_str::<Vec<InboxItem>>(&items_json) {
            Ok(items) => {
                let _ = self.arrivals.send(items);
            }
            Err(e) => error!("[CLI/Inbox] ❌ 无法解析收件箱事件: {}", e),
        }
    }

    async fn on_inbox_emptied(&self) {
        info!("[CLI/Inbox] 📭 收件箱已清空");
    }

    async fn on_form_settings_changed(&self, settings_json: String) {
        info!("[CLI/Inbox] 📝 表单设置: {}", settings_json);
    }
}

struct CliOrderListener;

#[async_trait::async_trait]
impl OrderListener for CliOrderListener {
    async fn on_order_list_changed(&self, _orders_json: String) {}

    async fn on_stats_changed(&self, stats_json: String) {
        info!("[CLI/Order] 📊 统计更新: {}", stats_json);
    }
}

fn format_order(r: &OrderRecord) -> String {
    format!(
        "{} | {} | {} | 单价 {} x{} (已买 {}) | 应收 {} | {} | {}",
        r.id,
        r.buyer_name,
        r.product_name,
        r.unit_cost,
        r.requested_quantity,
        r.purchased_quantity,
        r.calculated_price,
        r.status,
        if r.is_paid { "已付" } else { "未付" }
    )
}

fn build_config(args: &Args) -> ClientConfig {
    let mut config = ClientConfig::new(args.db_url.clone());
    config.remote = args.database_url.clone().map(|url| {
        let mut remote = RemoteConfig::new(url);
        remote.auth_token = args.auth_token.clone();
        remote
    });
    config.store_id = args.store_id.clone();
    config.rates = ExchangeRates {
        cost_rate: args.cost_rate,
        sell_rate: args.sell_rate,
    };
    config
}

async fn run_watch(
    mut client: RentoClient,
    auto_accept: bool,
    duration: u64,
    clipboard_cmd: Option<String>,
    clipboard_file: Option<PathBuf>,
    no_clipboard: bool,
    mut arrivals: mpsc::UnboundedReceiver<Vec<InboxItem>>,
) -> Result<()> {
    if !no_clipboard {
        match (clipboard_file, clipboard_cmd) {
            (Some(path), _) => {
                info!("[CLI] 📋 以文件作为剪贴板: {}", path.display());
                client.set_clipboard_source(Arc::new(FileClipboard::new(path)));
            }
            (None, Some(cmd)) => match CommandClipboard::from_command_line(&cmd) {
                Some(source) => client.set_clipboard_source(Arc::new(source)),
                None => warn!("[CLI] ⚠️ 剪贴板命令为空，跳过剪贴板轮询"),
            },
            (None, None) => {
                client.set_clipboard_source(Arc::new(CommandClipboard::platform_default()))
            }
        }
    }

    client.start().await?;
    info!("[CLI] 📥 开始监听收件箱，店铺 ID: {}", client.store_id());
    if auto_accept {
        info!("[CLI] ⚡ 已开启自动准入");
    }

    let deadline = async {
        if duration > 0 {
            info!("[CLI] ⏰ {} 秒后自动退出", duration);
            sleep(Duration::from_secs(duration)).await;
        } else {
            info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            Some(items) = arrivals.recv() => {
                for item in &items {
                    info!(
                        "[CLI/Inbox] 🆕 {} | {} | {} | 来源: {:?}",
                        item.id(),
                        item.candidate.buyer_name.as_deref().unwrap_or("-"),
                        item.candidate.product_name.as_deref().unwrap_or("-"),
                        item.origin
                    );
                }
                if auto_accept {
                    for item in items {
                        let admitted = client.accept(item.candidate).await?;
                        info!("[CLI] ✅ 自动准入: {}", format_order(&admitted.record));
                    }
                }
            }
        }
    }

    client.shutdown();
    info!("[CLI] 👋 程序退出");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, &args.log_file)?;

    // 买家端提交不需要本地数据库
    if let Command::Submit {
        link,
        buyer,
        product,
        price,
        quantity,
        notes,
    } = &args.command
    {
        let candidate = OrderCandidate {
            buyer_name: buyer.clone(),
            product_name: product.clone(),
            unit_cost: *price,
            requested_quantity: quantity.map(f64::from),
            notes: notes.clone(),
            ..Default::default()
        };
        let key = submit_order(link, &candidate).await?;
        println!("{}", key);
        return Ok(());
    }

    let mut config = build_config(&args);
    if let Command::Watch {
        poll_interval_ms, ..
    } = &args.command
    {
        if *poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于 0"));
        }
        config.clipboard_poll_interval = Duration::from_millis(*poll_interval_ms);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut client = RentoClient::new(config);
    client.set_inbox_listener(Arc::new(CliInboxListener { arrivals: tx }));
    client.set_order_listener(Arc::new(CliOrderListener));
    client.init().await?;

    match args.command {
        Command::Watch {
            auto_accept,
            duration,
            clipboard_cmd,
            clipboard_file,
            no_clipboard,
            ..
        } => {
            run_watch(
                client,
                auto_accept,
                duration,
                clipboard_cmd,
                clipboard_file,
                no_clipboard,
                rx,
            )
            .await?;
        }
        Command::List => {
            let orders = client.list_orders().await?;
            info!("[CLI] 📋 本地订单（共 {} 条）", orders.len());
            for order in &orders {
                println!("{}", format_order(order));
            }
        }
        Command::Add {
            buyer,
            product,
            price,
            quantity,
            charge,
            notes,
        } => {
            let record = client
                .add_manual_order(OrderCandidate {
                    buyer_name: buyer,
                    product_name: product,
                    unit_cost: price,
                    requested_quantity: quantity.map(f64::from),
                    calculated_price: charge,
                    notes,
                    ..Default::default()
                })
                .await?;
            println!("{}", format_order(&record));
        }
        Command::Stats => {
            let stats = client.stats().await?;
            println!("订单数:       {}", stats.order_count);
            println!("未付款订单:   {}", stats.unpaid_count);
            println!("外币总成本:   {}", stats.total_cost_foreign);
            println!("应收总额:     {}", stats.total_billed);
            println!("已收款:       {}", stats.total_collected);
            println!("待收款:       {}", stats.outstanding());
            println!("利润:         {}", stats.total_margin);
        }
        Command::Delete { id } => {
            if client.delete_order(&id).await? {
                println!("已删除 {}", id);
            } else {
                warn!("[CLI] ⚠️ 订单 {} 不存在", id);
            }
        }
        Command::SetStatus { id, status } => {
            let updated = match status {
                Some(status) => client.set_status(&id, status).await?,
                None => client.advance_status(&id).await?,
            };
            match updated {
                Some(record) => println!("{}", format_order(&record)),
                None => warn!("[CLI] ⚠️ 订单 {} 不存在", id),
            }
        }
        Command::TogglePaid { id } => match client.toggle_paid(&id).await? {
            Some(record) => println!("{}", format_order(&record)),
            None => warn!("[CLI] ⚠️ 订单 {} 不存在", id),
        },
        Command::ShareLink { base_url } => {
            println!("{}", client.share_link(&base_url)?);
        }
        Command::RotateStoreId => {
            let id = client.rotate_store_id().await?;
            println!("{}", id);
        }
        Command::ExportPayload { ids } => {
            println!("{}", client.export_payload(&ids).await?);
        }
        Command::Form { active, deadline } => {
            if active.is_none() && deadline.is_none() {
                let settings = client.get_form_settings().await?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                let current = client.get_form_settings().await?;
                let settings = FormSettings {
                    is_form_active: active.unwrap_or(current.is_form_active),
                    deadline: deadline.unwrap_or(current.deadline),
                };
                client.set_form_settings(&settings).await?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        }
        Command::Submit { .. } => {}
    }

    Ok(())
}
