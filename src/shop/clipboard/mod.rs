//! 剪贴板轮询模块
//!
//! 买家无法连上云端时，把 `RENTO_DATA::...::END` 载荷通过聊天软件发给代购，
//! 代购复制后由轮询器自动识别并放入收件箱。

pub mod poller;
pub mod source;

pub use poller::{ClipboardPoller, ClipboardSink, PollerHandle};
pub use source::{ClipboardSource, CommandClipboard, FileClipboard};
