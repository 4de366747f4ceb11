//! 剪贴板读取来源

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// 可读取文本的共享通道
#[async_trait]
pub trait ClipboardSource: Send + Sync {
    /// 读取当前文本；通道为空时返回 None
    async fn read_text(&self) -> Result<Option<String>>;
}

/// 通过外部命令读取系统剪贴板（`pbpaste`、`xclip -o -selection clipboard`、`wl-paste` 等）
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 从一整行命令解析（按空白切分）
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// 当前平台的默认读取命令
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("pbpaste", Vec::new())
        } else if cfg!(target_os = "windows") {
            Self::new(
                "powershell",
                vec!["-NoProfile".into(), "-Command".into(), "Get-Clipboard".into()],
            )
        } else {
            Self::new(
                "xclip",
                vec!["-o".into(), "-selection".into(), "clipboard".into()],
            )
        }
    }
}

#[async_trait]
impl ClipboardSource for CommandClipboard {
    async fn read_text(&self) -> Result<Option<String>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .context(format!("执行剪贴板命令 {} 失败", self.program))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "剪贴板命令 {} 退出码 {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok((!text.is_empty()).then_some(text))
    }
}

/// 以文本文件充当共享通道（多个进程/设备通过同步盘共享时使用）
pub struct FileClipboard {
    path: PathBuf,
}

impl FileClipboard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ClipboardSource for FileClipboard {
    async fn read_text(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("读取 {} 失败", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_clipboard_reads_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.txt");
        let clip = FileClipboard::new(&path);
        assert_eq!(clip.read_text().await.unwrap(), None);

        tokio::fs::write(&path, "hello").await.unwrap();
        assert_eq!(clip.read_text().await.unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn command_line_is_split_into_program_and_args() {
        let clip = CommandClipboard::from_command_line("xclip -o -selection clipboard").unwrap();
        assert_eq!(clip.program, "xclip");
        assert_eq!(clip.args, vec!["-o", "-selection", "clipboard"]);
        assert!(CommandClipboard::from_command_line("   ").is_none());
    }
}
