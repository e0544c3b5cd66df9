use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use super::error::{DownloadError, ErrorKind};
use super::task::DownloadTask;
use crate::common::client::client::DEFAULT_TIMEOUT;
use crate::common::client::retry::RetryPolicy;
use crate::common::utils::sanitize_title;

/// 每次写盘、上报进度的块大小
pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Video,
    Audio,
}

impl FileType {
    pub fn label(self) -> &'static str {
        match self {
            FileType::Video => "视频流",
            FileType::Audio => "音频流",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub chunk_size: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub output_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            output_dir: PathBuf::from("."),
        }
    }
}

/// 一次下载用到的三个路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
}

impl BatchLayout {
    /// 创建目录并生成 `<标题>_<时间戳>_temp_video.m4s` 等文件名
    pub async fn prepare(dir: &Path, title: &str) -> Result<Self, DownloadError> {
        tokio::fs::create_dir_all(dir).await?;

        ensure_writable(dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        Ok(Self::with_timestamp(dir, title, &timestamp))
    }

    pub fn with_timestamp(dir: &Path, title: &str, timestamp: &str) -> Self {
        let safe_title = sanitize_title(title);
        Self {
            video_path: dir.join(format!("{}_{}_temp_video.m4s", safe_title, timestamp)),
            audio_path: dir.join(format!("{}_{}_temp_audio.m4s", safe_title, timestamp)),
            output_path: dir.join(format!("{}_{}.mp4", safe_title, timestamp)),
        }
    }
}

/// 真正建一个文件再删掉，权限位、属主和只读挂载都能反映出来
fn ensure_writable(dir: &Path) -> Result<(), DownloadError> {
    tempfile::Builder::new()
        .prefix(".bilidl_")
        .tempfile_in(dir)
        .map(drop)
        .map_err(|e| {
            DownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("下载路径没有写入权限: {}: {}", dir.display(), e),
            ))
        })
}

/// 必须都成功才能合并的一对音视频任务
#[derive(Debug, Clone)]
pub struct DownloadBatch {
    pub id: Uuid,
    pub video: DownloadTask,
    pub audio: DownloadTask,
    pub output_path: PathBuf,
}

impl DownloadBatch {
    pub fn new(video: DownloadTask, audio: DownloadTask, output_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video,
            audio,
            output_path: output_path.into(),
        }
    }

    pub fn from_layout(video_url: &str, audio_url: &str, layout: &BatchLayout) -> Self {
        Self::new(
            DownloadTask::video(video_url, &layout.video_path),
            DownloadTask::audio(audio_url, &layout.audio_path),
            &layout.output_path,
        )
    }
}

/// 整个批次的最终结果，每个批次最多上报一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Muxed {
        output_path: PathBuf,
    },
    DownloadFailed {
        label: String,
        kind: ErrorKind,
        diagnostic: String,
    },
    MuxFailed {
        diagnostic: String,
    },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Muxed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            BatchOutcome::Muxed { output_path } => {
                format!("视频合并完成: {}", output_path.display())
            }
            BatchOutcome::DownloadFailed {
                label, diagnostic, ..
            } => format!("{}下载失败: {}", label, diagnostic),
            BatchOutcome::MuxFailed { diagnostic } => format!("合并失败: {}", diagnostic),
        }
    }
}
