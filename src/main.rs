use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::Colorize;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use bili_dual_dl::auth::Credentials;
use bili_dual_dl::cli::Cli;
use bili_dual_dl::common::api::client::ApiClient;
use bili_dual_dl::common::api::models::video::StreamUrls;
use bili_dual_dl::common::client::client::BiliClient;
use bili_dual_dl::common::client::retry::RetryPolicy;
use bili_dual_dl::common::logger::PrettyLogger;
use bili_dual_dl::common::models::VideoQuality;
use bili_dual_dl::common::utils::extract_bvid;
use bili_dual_dl::downloader::{
    BatchLayout, ConsoleSink, DownloadBatch, DownloadConfig, DualStreamCoordinator, LogSink, ProgressSink,
};
use bili_dual_dl::post_process::MediaMerger;
use bili_dual_dl::{log_error, log_info, log_step, log_warning};

/// 解析出的下载源
struct Source {
    title: String,
    streams: StreamUrls,
}

/// 有进度条时日志经由进度条输出，避免打断绘制
fn init_tracing(verbose: bool, console: Option<&ConsoleSink>) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let writer = match console {
        Some(console) => BoxMakeWriter::new(console.log_writer()),
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(writer)
        .init();
}

async fn load_credentials(args: &Cli) -> Result<Credentials> {
    let credentials = match &args.cookie {
        Some(raw) => {
            info!("使用提供的cookie");
            Credentials::from_cookie_header(raw).context("cookie 格式错误")?
        }
        None => Credentials::load(&args.cookie_file)
            .await
            .with_context(|| format!("读取cookie文件失败: {}", args.cookie_file.display()))?,
    };

    if !credentials.is_logged_in() {
        log_warning!("未提供登录信息，可能无法下载高清或受限内容");
    }
    Ok(credentials)
}

async fn resolve_source(args: &Cli, client: &BiliClient) -> Result<Source> {
    if let (Some(video_url), Some(audio_url)) = (&args.video_url, &args.audio_url) {
        return Ok(Source {
            title: args.title.clone().unwrap_or_else(|| "video".to_string()),
            streams: StreamUrls {
                video_url: video_url.clone(),
                audio_url: audio_url.clone(),
            },
        });
    }

    let input = args.url.as_deref().ok_or_else(|| anyhow!("需要视频链接或音视频流地址"))?;
    let bvid = extract_bvid(input).ok_or_else(|| anyhow!("无法识别的视频链接: {}", input))?;

    let quality = VideoQuality::from_qn(args.quality).unwrap_or_else(|| {
        warn!("不支持的清晰度 {}，使用默认清晰度", args.quality);
        VideoQuality::default()
    });

    log_step!("解析视频信息: {}", bvid);
    let api = ApiClient::new(client.clone());
    let info = api.video_info(&bvid).await.context("获取视频信息失败")?;
    let page = args
        .page
        .checked_sub(1)
        .and_then(|idx| info.pages.get(idx))
        .ok_or_else(|| anyhow!("分P {} 不存在，共 {} P", args.page, info.pages.len()))?;
    debug!("aid={}, cid={}, 分P标题: {}", info.aid, page.cid, page.part);

    let streams = api
        .play_url(info.aid, page.cid, quality.qn())
        .await
        .context("获取播放地址失败")?;

    let title = match (&args.title, info.pages.len()) {
        (Some(title), _) => title.clone(),
        (None, 1) => info.title.clone(),
        (None, _) => format!("{}_{}", info.title, page.part),
    };
    PrettyLogger::video_info(&title, quality.to_string());
    Ok(Source { title, streams })
}

async fn run(args: Cli, console: Option<Arc<ConsoleSink>>) -> Result<bool> {
    // ffmpeg 只在启动时查找一次，找不到直接退出
    let merger = MediaMerger::locate(args.ffmpeg.as_deref())?;
    debug!("ffmpeg: {:?}", merger.ffmpeg_path());

    let config = DownloadConfig {
        timeout: Duration::from_secs(args.timeout.max(1)),
        retry: RetryPolicy::default().with_attempts(args.retries),
        output_dir: args.output_dir.clone(),
        ..DownloadConfig::default()
    };

    let credentials = load_credentials(&args).await?;
    let client = BiliClient::with_options(credentials, config.timeout, config.retry.clone())?;
    let source = resolve_source(&args, &client).await?;

    let layout = BatchLayout::prepare(&config.output_dir, &source.title).await?;
    PrettyLogger::file_info("输出文件", layout.output_path.display().to_string());
    PrettyLogger::separator();

    let sink: Arc<dyn ProgressSink> = match console {
        Some(console) => console as Arc<dyn ProgressSink>,
        None => Arc::new(LogSink),
    };
    let coordinator = DualStreamCoordinator::new(client, Arc::new(merger), sink).with_chunk_size(config.chunk_size);
    let batch = DownloadBatch::from_layout(&source.streams.video_url, &source.streams.audio_url, &layout);
    let handle = coordinator.start(batch);

    let video_token = handle.video_token();
    let audio_token = handle.audio_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消下载...");
            video_token.cancel();
            audio_token.cancel();
        }
    });

    let report = handle.wait().await?;
    match report.outcome {
        Some(outcome) => Ok(outcome.is_success()),
        None => {
            log_info!("下载已取消，临时文件已保留，重新运行即可继续下载");
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let console = (!args.no_progress).then(|| Arc::new(ConsoleSink::new()));
    init_tracing(args.verbose, console.as_deref());

    match run(args, console).await {
        Ok(true) => {
            info!("{}", "下载完成！".green());
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log_error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

