use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chardetng::EncodingDetector;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BIN: &str = "ffmpeg";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("未找到 ffmpeg，请安装 ffmpeg 或通过 FFMPEG_PATH 指定可执行文件路径")]
    FfmpegNotFound,

    #[error("指定的 ffmpeg 不存在: {0}")]
    InvalidFfmpegPath(PathBuf),

    #[error("启动 ffmpeg 失败: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("合并失败: {diagnostic}")]
    Failed {
        code: Option<i32>,
        diagnostic: String,
    },
}

/// 合并结果：成功时为输出文件路径
pub type MuxResult = Result<PathBuf, MergeError>;

/// 把一路视频和一路音频合成一个文件
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> MuxResult;
}

/// 调用外部 ffmpeg 做无重编码的封装合并
#[derive(Debug, Clone)]
pub struct MediaMerger {
    ffmpeg: PathBuf,
}

impl MediaMerger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// 启动时解析一次 ffmpeg 路径：显式指定 > FFMPEG_PATH > 程序目录下的打包版本 > PATH
    pub fn locate(explicit: Option<&Path>) -> Result<Self, MergeError> {
        if let Some(path) = explicit {
            return Self::existing(path);
        }

        if let Some(path) = std::env::var_os("FFMPEG_PATH").filter(|p| !p.is_empty()) {
            return Self::existing(Path::new(&path));
        }

        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        if let Some(merger) = Self::search(bundled) {
            debug!("使用打包的 ffmpeg: {:?}", merger.ffmpeg);
            return Ok(merger);
        }

        let path_dirs = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();
        match Self::search(path_dirs) {
            Some(merger) => {
                debug!("使用系统 ffmpeg: {:?}", merger.ffmpeg);
                Ok(merger)
            }
            None => {
                error!("❌ 未检测到 ffmpeg，安装方法参考：https://ffmpeg.org/download.html");
                Err(MergeError::FfmpegNotFound)
            }
        }
    }

    /// 在给定目录中按顺序查找 ffmpeg，结果统一转成绝对路径
    fn search(dirs: impl IntoIterator<Item = PathBuf>) -> Option<Self> {
        dirs.into_iter()
            .map(|dir| dir.join(FFMPEG_BIN))
            .find_map(|candidate| Self::existing(&candidate).ok())
    }

    fn existing(path: &Path) -> Result<Self, MergeError> {
        if !path.is_file() {
            return Err(MergeError::InvalidFfmpegPath(path.to_path_buf()));
        }
        let absolute = std::fs::canonicalize(path)
            .map_err(|_| MergeError::InvalidFfmpegPath(path.to_path_buf()))?;
        Ok(Self::new(absolute))
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// `ffmpeg -i <video> -i <audio> -c copy -y <output>`
    pub fn build_command(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-i")
            .arg(video_path)
            .arg("-i")
            .arg(audio_path)
            .arg("-c")
            .arg("copy")
            .arg("-y")
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }
}

#[async_trait]
impl Muxer for MediaMerger {
    async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> MuxResult {
        debug!("开始合并视频和音频 -> 输出路径: {:?}", output_path);

        let output = self
            .build_command(video_path, audio_path, output_path)
            .output()
            .await?;
        let diagnostic = decode_diagnostic(&output.stderr);

        if !output.status.success() {
            error!("❌ ffmpeg 合并失败，错误日志如下：\n{}", diagnostic);
            return Err(MergeError::Failed {
                code: output.status.code(),
                diagnostic,
            });
        }

        // 删除失败只记录日志，不影响合并结果
        for input in [video_path, audio_path] {
            if let Err(e) = tokio::fs::remove_file(input).await {
                warn!("删除临时文件失败: {:?}: {}", input, e);
            }
        }

        info!("✅ 视频与音频合并成功，输出文件: {:?}", output_path);
        Ok(output_path.to_path_buf())
    }
}

/// 解码 ffmpeg 的错误输出：先按 UTF-8，再按 GBK，最后按探测到的编码尽量解码
pub fn decode_diagnostic(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }

    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }

    if let Some(text) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(raw) {
        return text.into_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(raw, true);
    let encoding = detector.guess(None, true);
    let (text, _, had_errors) = encoding.decode(raw);
    if had_errors {
        warn!("ffmpeg 输出解码时有字符丢失");
    }
    text.into_owned()
}
