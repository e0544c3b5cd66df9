use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// B站音视频下载器
#[derive(Parser, Debug)]
#[command(name = "bilidl")]
#[command(version = "1.0")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "并发下载B站视频的音视频流，支持断点续传，完成后用 ffmpeg 合并", long_about = None)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["url", "video_url"]),
))]
pub struct Cli {
    /// 视频链接或 BV 号
    #[arg(long, visible_alias = "bvid", value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub url: Option<String>,

    /// 直接指定视频流地址 (需同时指定 --audio-url)
    #[arg(long, value_name = "URL", requires = "audio_url")]
    pub video_url: Option<String>,

    /// 直接指定音频流地址
    #[arg(long, value_name = "URL", requires = "video_url")]
    pub audio_url: Option<String>,

    /// 分P序号，从 1 开始
    #[arg(long, value_name = "PAGE", default_value_t = 1)]
    pub page: usize,

    /// 视频质量
    #[arg(long)]
    #[arg(value_name = "QUALITY")]
    #[arg(default_value = "80")]
    #[arg(help = "视频质量: 127=8K, 120=4K, 116=1080P60, 80=1080P, 64=720P, 32=480P, 16=360P")]
    pub quality: u32,

    /// 视频保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = ".")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 输出文件标题 (默认使用视频标题)
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Cookie字符串 (可选)
    #[arg(long, value_name = "COOKIE")]
    #[arg(help = "手动指定Cookie，如: SESSDATA=xxx; bili_jct=yyy")]
    pub cookie: Option<String>,

    /// Cookie 文件
    #[arg(long, value_name = "FILE", default_value = "bili_cookies.json")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub cookie_file: PathBuf,

    /// ffmpeg 路径 (默认依次查找 FFMPEG_PATH、程序目录、PATH)
    #[arg(long, value_name = "PATH")]
    #[arg(value_hint = clap::ValueHint::ExecutablePath)]
    pub ffmpeg: Option<PathBuf>,

    /// 单个请求的最大尝试次数
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub retries: u32,

    /// 连接与读取超时 (秒)
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// 不显示进度条，只输出日志
    #[arg(long)]
    pub no_progress: bool,

    /// 输出调试日志
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
