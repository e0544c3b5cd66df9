use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, error, info};
use tracing_subscriber::fmt::MakeWriter;

use super::models::BatchOutcome;
use crate::common::logger::PrettyLogger;
use crate::common::utils::FormatTool;

/// 一次进度上报
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub label: String,
    /// 0-100，总大小未知时为 0
    pub percent: u8,
    pub downloaded: u64,
    /// 0 表示未知
    pub total: u64,
    /// 本次运行的平均速度，字节/秒
    pub speed_bps: f64,
}

const CHUNK_STATUS_PREFIX: &str = "正在下载";

/// 每写完一块后的状态行
pub fn chunk_status(label: &str, downloaded: u64, total: u64, percent: u8, speed_bps: f64) -> String {
    let total_text = if total > 0 {
        FormatTool::format_size(total)
    } else {
        "未知大小".to_string()
    };
    format!(
        "{}{}: {}/{} ({}%) - {}",
        CHUNK_STATUS_PREFIX,
        label,
        FormatTool::format_size(downloaded),
        total_text,
        percent,
        FormatTool::format_speed(speed_bps)
    )
}

/// 是否为 [`chunk_status`] 生成的逐块状态行
pub fn is_chunk_status(message: &str) -> bool {
    message.starts_with(CHUNK_STATUS_PREFIX)
}

/// 进度与状态的观察者
///
/// 两个流的事件可能交错到达，实现方不能假设同一时刻只有一个任务在上报。
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
    fn on_status(&self, message: &str);
    fn on_complete(&self, outcome: &BatchOutcome);
}

/// 只写 tracing 日志
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_progress(&self, event: &ProgressEvent) {
        debug!(label = %event.label, percent = event.percent, downloaded = event.downloaded, "下载进度");
    }

    fn on_status(&self, message: &str) {
        info!("{}", message);
    }

    fn on_complete(&self, outcome: &BatchOutcome) {
        if outcome.is_success() {
            info!("{}", outcome.message());
        } else {
            error!("{}", outcome.message());
        }
    }
}

/// 终端进度条，每个流一根
pub struct ConsoleSink {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    pub fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// 给 tracing 用的输出，写日志时先挂起进度条
    pub fn log_writer(&self) -> SuspendingWriter {
        SuspendingWriter {
            multi: self.multi.clone(),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:>8} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    fn bar_for(&self, label: &str) -> Option<ProgressBar> {
        let mut bars = self.bars.lock().ok()?;
        let bar = bars.entry(label.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(100));
            pb.set_style(Self::style());
            pb.set_prefix(label.to_string());
            pb
        });
        Some(bar.clone())
    }
}

impl ProgressSink for ConsoleSink {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(pb) = self.bar_for(&event.label) {
            pb.set_position(event.percent as u64);
            let total = if event.total > 0 {
                FormatTool::format_size(event.total)
            } else {
                "?".to_string()
            };
            pb.set_message(format!(
                "{}/{} {}",
                FormatTool::format_size(event.downloaded),
                total,
                FormatTool::format_speed(event.speed_bps)
            ));
        }
    }

    fn on_status(&self, message: &str) {
        // 逐块的进度已经显示在进度条上
        if is_chunk_status(message) {
            debug!("{}", message);
            return;
        }
        if self.multi.println(message).is_err() {
            PrettyLogger::info(message);
        }
    }

    fn on_complete(&self, outcome: &BatchOutcome) {
        if let Ok(bars) = self.bars.lock() {
            for pb in bars.values() {
                pb.finish();
            }
        }
        self.multi.suspend(|| {
            if outcome.is_success() {
                PrettyLogger::success(outcome.message());
            } else {
                PrettyLogger::error(outcome.message());
            }
        });
    }
}

/// 输出到 stderr，写之前挂起 [`MultiProgress`] 的绘制
#[derive(Clone)]
pub struct SuspendingWriter {
    multi: MultiProgress,
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi
            .suspend(|| io::stderr().lock().write_all(buf))
            .map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for SuspendingWriter {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
