use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::core::{ResumableDownloader, TaskOutcome, TaskReport};
use super::error::DownloadError;
use super::models::{BatchOutcome, CHUNK_SIZE, DownloadBatch};
use super::progress::ProgressSink;
use super::task::{DownloadTask, TaskState};
use crate::common::client::client::BiliClient;
use crate::post_process::{MergeError, Muxer};

/// 计数型的汇合点：`parties` 方都到达时，恰好有一个 `arrive` 返回 true
#[derive(Debug)]
pub struct JoinLatch {
    remaining: AtomicUsize,
}

impl JoinLatch {
    pub fn new(parties: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
        }
    }

    /// 最后一个到达者返回 true；多余的到达不会让计数下溢
    pub fn arrive(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            == Ok(1)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

/// 两个下载任务共享的批次状态
struct BatchShared {
    latch: JoinLatch,
    settled: AtomicBool,
    outcome: Mutex<Option<BatchOutcome>>,
    video_path: PathBuf,
    audio_path: PathBuf,
    output_path: PathBuf,
    muxer: Arc<dyn Muxer>,
    sink: Arc<dyn ProgressSink>,
}

impl BatchShared {
    /// 批次结果只上报一次，后到的结果只记日志
    fn settle(&self, outcome: BatchOutcome) {
        if self.settled.swap(true, Ordering::AcqRel) {
            debug!("批次结果已上报，忽略: {}", outcome.message());
            return;
        }
        self.sink.on_complete(&outcome);
        if let Ok(mut slot) = self.outcome.lock() {
            *slot = Some(outcome);
        }
    }

    async fn mux(&self) -> BatchOutcome {
        self.sink.on_status("开始合并视频和音频...");
        match self
            .muxer
            .mux(&self.video_path, &self.audio_path, &self.output_path)
            .await
        {
            Ok(output_path) => {
                self.sink.on_status("视频合并完成");
                BatchOutcome::Muxed { output_path }
            }
            Err(e) => {
                let diagnostic = match e {
                    MergeError::Failed { diagnostic, .. } => diagnostic,
                    other => other.to_string(),
                };
                self.sink.on_status(&format!("合并失败: {}", diagnostic));
                BatchOutcome::MuxFailed { diagnostic }
            }
        }
    }

    async fn on_task_finished(&self, report: &TaskReport) {
        match &report.outcome {
            TaskOutcome::Completed => {
                if self.latch.arrive() {
                    // 第二个完成的任务负责触发合并
                    let outcome = self.mux().await;
                    self.settle(outcome);
                }
            }
            TaskOutcome::Failed(e) => {
                // 另一个任务继续跑，但批次已经不可能合并，立即上报
                self.settle(BatchOutcome::DownloadFailed {
                    label: report.task.label.clone(),
                    kind: e.kind(),
                    diagnostic: e.to_string(),
                });
            }
            TaskOutcome::Cancelled => {
                debug!("{}已取消，批次不会合并", report.task.label);
            }
        }
    }
}

/// 批次结束后的汇总
#[derive(Debug)]
pub struct BatchReport {
    pub id: Uuid,
    pub video: TaskReport,
    pub audio: TaskReport,
    /// 仅因取消而结束时为 `None`
    pub outcome: Option<BatchOutcome>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(BatchOutcome::is_success)
    }
}

/// 正在运行的批次
///
/// 取消是按任务的，取消一个流不会影响另一个。
pub struct BatchHandle {
    id: Uuid,
    video_cancel: CancellationToken,
    audio_cancel: CancellationToken,
    join: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_video(&self) {
        self.video_cancel.cancel();
    }

    pub fn cancel_audio(&self) {
        self.audio_cancel.cancel();
    }

    pub fn cancel(&self) {
        self.cancel_video();
        self.cancel_audio();
    }

    pub fn video_token(&self) -> CancellationToken {
        self.video_cancel.clone()
    }

    pub fn audio_token(&self) -> CancellationToken {
        self.audio_cancel.clone()
    }

    pub async fn wait(self) -> Result<BatchReport, DownloadError> {
        self.join
            .await
            .map_err(|e| DownloadError::Unexpected(format!("批次任务异常退出: {}", e)))
    }
}

/// 并发下载音视频两个流，都成功后合并
pub struct DualStreamCoordinator {
    client: BiliClient,
    muxer: Arc<dyn Muxer>,
    sink: Arc<dyn ProgressSink>,
    chunk_size: usize,
}

impl DualStreamCoordinator {
    pub fn new(client: BiliClient, muxer: Arc<dyn Muxer>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            client,
            muxer,
            sink,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 启动批次，立即返回句柄
    pub fn start(&self, batch: DownloadBatch) -> BatchHandle {
        let DownloadBatch {
            id,
            video,
            audio,
            output_path,
        } = batch;

        info!(batch = %id, "开始下载到: {}", output_path.display());

        let shared = Arc::new(BatchShared {
            latch: JoinLatch::new(2),
            settled: AtomicBool::new(false),
            outcome: Mutex::new(None),
            video_path: video.output_path.clone(),
            audio_path: audio.output_path.clone(),
            output_path,
            muxer: Arc::clone(&self.muxer),
            sink: Arc::clone(&self.sink),
        });

        let video_cancel = CancellationToken::new();
        let audio_cancel = CancellationToken::new();
        let video_handle = self.spawn_task(video.clone(), video_cancel.clone(), Arc::clone(&shared), id);
        let audio_handle = self.spawn_task(audio.clone(), audio_cancel.clone(), Arc::clone(&shared), id);

        let join = tokio::spawn(async move {
            let (video_result, audio_result) = tokio::join!(video_handle, audio_handle);
            let video_report = Self::collect(video_result, video, &shared);
            let audio_report = Self::collect(audio_result, audio, &shared);

            let outcome = shared.outcome.lock().ok().and_then(|mut slot| slot.take());
            if outcome.is_none() {
                info!(batch = %id, "批次已取消，未合并");
            }

            BatchReport {
                id,
                video: video_report,
                audio: audio_report,
                outcome,
            }
        });

        BatchHandle {
            id,
            video_cancel,
            audio_cancel,
            join,
        }
    }

    fn spawn_task(
        &self,
        task: DownloadTask,
        cancel: CancellationToken,
        shared: Arc<BatchShared>,
        batch_id: Uuid,
    ) -> JoinHandle<TaskReport> {
        let span = info_span!("stream", batch = %batch_id, label = %task.label);
        let downloader = ResumableDownloader::new(self.client.clone(), task, Arc::clone(&self.sink), cancel)
            .with_chunk_size(self.chunk_size);

        tokio::spawn(
            async move {
                let report = downloader.start().await;
                shared.on_task_finished(&report).await;
                report
            }
            .instrument(span),
        )
    }

    /// 下载任务 panic 时也要产出失败报告，不把异常抛给调用方
    fn collect(
        result: Result<TaskReport, tokio::task::JoinError>,
        mut task: DownloadTask,
        shared: &BatchShared,
    ) -> TaskReport {
        match result {
            Ok(report) => report,
            Err(e) => {
                error!("{}任务异常退出: {}", task.label, e);
                if let Err(state_err) = task.advance(TaskState::Failed) {
                    warn!("{}", state_err);
                }
                let err = DownloadError::Unexpected(e.to_string());
                shared.settle(BatchOutcome::DownloadFailed {
                    label: task.label.clone(),
                    kind: err.kind(),
                    diagnostic: err.to_string(),
                });
                TaskReport {
                    task,
                    outcome: TaskOutcome::Failed(err),
                }
            }
        }
    }
}
