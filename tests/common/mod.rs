//! 集成测试共用的假服务端、记录型 sink 和计数 muxer

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use wiremock::{Request, Respond, ResponseTemplate};

use bili_dual_dl::auth::Credentials;
use bili_dual_dl::common::client::client::BiliClient;
use bili_dual_dl::common::client::retry::RetryPolicy;
use bili_dual_dl::downloader::{BatchOutcome, ProgressEvent, ProgressSink};
use bili_dual_dl::post_process::{MergeError, MuxResult, Muxer};

pub const MIB: usize = 1024 * 1024;

/// 可预测的测试数据
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn test_client() -> BiliClient {
    BiliClient::with_options(
        Credentials::anonymous(),
        Duration::from_secs(5),
        RetryPolicy::default().with_base_delay(Duration::from_millis(10)),
    )
    .unwrap()
}

/// 按 `Range: bytes=n-` 返回分段内容的文件服务
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    honor_range: bool,
    delay: Duration,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            honor_range: true,
            delay: Duration::ZERO,
        }
    }

    /// 忽略 Range，总是返回 200 全量内容
    pub fn ignoring_range(body: Vec<u8>) -> Self {
        Self {
            honor_range: false,
            ..Self::new(body)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub fn range_start(request: &Request) -> Option<usize> {
    request
        .headers
        .get("range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.trim_end_matches('-').parse().ok())
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        let template = match range_start(request) {
            Some(start) if self.honor_range && start >= total => {
                ResponseTemplate::new(416).insert_header("Content-Range", format!("bytes */{}", total))
            }
            Some(start) if self.honor_range => ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes {}-{}/{}", start, total - 1, total))
                .set_body_bytes(self.body[start..].to_vec()),
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.to_vec()),
        };
        template.set_delay(self.delay)
    }
}

/// 带 Range 时返回起点错误的 206，不带时返回 200 全量
pub struct WrongStartResponder {
    body: Arc<Vec<u8>>,
}

impl WrongStartResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body: Arc::new(body) }
    }
}

impl Respond for WrongStartResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        match range_start(request) {
            Some(_) => ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes 0-{}/{}", total - 1, total))
                .set_body_bytes(self.body.to_vec()),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.to_vec()),
        }
    }
}

/// 记录所有回调，可选在某个进度时取消
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    statuses: Mutex<Vec<String>>,
    outcomes: Mutex<Vec<BatchOutcome>>,
    cancel_at: Option<(u8, CancellationToken)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_at(percent: u8, token: CancellationToken) -> Self {
        Self {
            cancel_at: Some((percent, token)),
            ..Self::default()
        }
    }

    pub fn events_for(&self, label: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.label == label)
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<BatchOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some((percent, token)) = &self.cancel_at {
            if event.percent >= *percent {
                token.cancel();
            }
        }
    }

    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn on_complete(&self, outcome: &BatchOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

/// 拼接两个输入作为输出，记录调用次数
#[derive(Default)]
pub struct CountingMuxer {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingMuxer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Muxer for CountingMuxer {
    async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> MuxResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MergeError::Failed {
                code: Some(1),
                diagnostic: "Invalid data found when processing input".to_string(),
            });
        }

        let mut merged = tokio::fs::read(video_path).await?;
        merged.extend(tokio::fs::read(audio_path).await?);
        tokio::fs::write(output_path, merged).await?;
        tokio::fs::remove_file(video_path).await?;
        tokio::fs::remove_file(audio_path).await?;
        Ok(output_path.to_path_buf())
    }
}
