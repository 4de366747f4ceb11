pub mod shop;

// 重新导出常用类型和函数，方便外部使用
pub use shop::{
    admission::Admitted,
    assistant::AssistantDraft,
    client::{submit_order, ClientConfig, RentoClient},
    clipboard::{ClipboardSource, CommandClipboard, FileClipboard},
    inbox::{CandidateOrigin, InboxItem, InboxListener},
    order::OrderListener,
    pricing::ExchangeRates,
    remote::{FormSettings, RemoteConfig},
    share_link::ShareLink,
    stats::OrderStats,
    types::{OrderCandidate, OrderPatch, OrderRecord, OrderStatus},
};
