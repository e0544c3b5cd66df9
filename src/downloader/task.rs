use std::path::{Path, PathBuf};

use super::error::DownloadError;
use super::models::FileType;

/// 单个流的下载状态
///
/// `Idle -> Requesting -> Streaming -> {Completed, Failed, Cancelled}`，
/// 进入终态后不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Idle, Requesting) | (Requesting, Streaming) => true,
            // 服务端报告临时文件已完整时，不经过 Streaming 直接完成
            (Requesting | Streaming, Completed) => true,
            (Idle | Requesting | Streaming, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub output_path: PathBuf,
    pub label: String,
    pub file_type: FileType,
    total_size: u64,
    downloaded: u64,
    state: TaskState,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        output_path: impl Into<PathBuf>,
        label: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            label: label.into(),
            file_type,
            total_size: 0,
            downloaded: 0,
            state: TaskState::Idle,
        }
    }

    pub fn video(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self::new(url, output_path, FileType::Video.label(), FileType::Video)
    }

    pub fn audio(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self::new(url, output_path, FileType::Audio.label(), FileType::Audio)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// 下载中的临时文件：`<output>.tmp`
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self.output_path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// 总大小，0 表示未知
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub(crate) fn advance(&mut self, next: TaskState) -> Result<(), DownloadError> {
        if !self.state.can_advance_to(next) {
            return Err(DownloadError::InvalidState(format!(
                "{}: {:?} -> {:?}",
                self.label, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn set_progress(&mut self, downloaded: u64, total_size: u64) {
        self.downloaded = downloaded;
        self.total_size = total_size;
    }
}

/// 百分比，总大小未知时为 0
pub fn percent_of(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((downloaded.min(total) as u128 * 100) / total as u128) as u8
}
