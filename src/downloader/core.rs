use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap};
use reqwest::Response;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::models::CHUNK_SIZE;
use super::progress::{ProgressEvent, ProgressSink, chunk_status};
use super::task::{DownloadTask, TaskState, percent_of};
use crate::common::client::client::BiliClient;

/// 单个任务的终态
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Failed(DownloadError),
    /// 被取消不算失败，临时文件保留用于续传
    Cancelled,
}

#[derive(Debug)]
pub struct TaskReport {
    pub task: DownloadTask,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed)
    }

    pub fn error(&self) -> Option<&DownloadError> {
        match &self.outcome {
            TaskOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// 根据响应状态和请求的续传位置得出的传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// 从头开始写，临时文件截断
    Fresh { total: u64 },
    /// 从 `offset` 开始追加
    Resume { offset: u64, total: u64 },
    /// 临时文件已经完整，只需重命名
    AlreadyComplete { total: u64 },
    /// 续传位置与服务端不符（区间起点不一致或临时文件比远端大），需要从头重新请求
    RangeMismatch,
}

impl Transfer {
    pub fn resolve(status: StatusCode, headers: &HeaderMap, first_byte: u64) -> Result<Self, DownloadError> {
        let content_length = header_u64(headers, CONTENT_LENGTH.as_str());
        let content_range = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(ContentRange::parse);

        match status {
            StatusCode::FORBIDDEN => Err(DownloadError::AuthExpired),
            StatusCode::OK => {
                if first_byte > 0 {
                    warn!("服务端忽略了 Range 请求，从头开始下载");
                }
                Ok(Transfer::Fresh {
                    total: content_length.unwrap_or(0),
                })
            }
            StatusCode::PARTIAL_CONTENT => {
                let start = content_range.and_then(|r| r.start).unwrap_or(first_byte);
                if start != first_byte {
                    if first_byte > 0 {
                        return Ok(Transfer::RangeMismatch);
                    }
                    return Err(DownloadError::Protocol(format!(
                        "未请求区间却收到从 {} 开始的分段响应",
                        start
                    )));
                }
                let total = content_range
                    .and_then(|r| r.total)
                    .or_else(|| content_length.map(|len| first_byte + len))
                    .unwrap_or(0);
                Ok(Transfer::Resume {
                    offset: first_byte,
                    total,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE if first_byte > 0 => {
                match content_range.and_then(|r| r.total) {
                    Some(total) if total == first_byte => Ok(Transfer::AlreadyComplete { total }),
                    // 临时文件比远端文件还大，只能丢掉重下
                    Some(total) if total < first_byte => Ok(Transfer::RangeMismatch),
                    _ => Err(DownloadError::UnexpectedStatus(status.as_u16())),
                }
            }
            other => Err(DownloadError::UnexpectedStatus(other.as_u16())),
        }
    }
}

/// `Content-Range: bytes <start>-<end>/<total>` 或 `bytes */<total>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: Option<u64>,
    total: Option<u64>,
}

impl ContentRange {
    fn parse(raw: &str) -> Option<Self> {
        let spec = raw.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = spec.split_once('/')?;
        let total = total.trim().parse().ok();
        let start = match range.trim() {
            "*" => None,
            r => Some(r.split_once('-')?.0.trim().parse().ok()?),
        };
        Some(Self { start, total })
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

enum Finish {
    Completed,
    Cancelled,
}

/// 负责单个流的断点续传下载
pub struct ResumableDownloader {
    client: BiliClient,
    task: DownloadTask,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    chunk_size: usize,
}

impl ResumableDownloader {
    pub fn new(
        client: BiliClient,
        task: DownloadTask,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            task,
            sink,
            cancel,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 执行下载直到终态，所有错误都转换成 [`TaskOutcome`]
    pub async fn start(mut self) -> TaskReport {
        info!("开始下载{}: {}", self.task.label, self.task.output_path.display());

        let outcome = match self.run().await {
            Ok(Finish::Completed) => {
                self.finish(TaskState::Completed);
                self.sink.on_status(&format!(
                    "{}下载完成，保存至: {}",
                    self.task.label,
                    self.task.output_path.display()
                ));
                TaskOutcome::Completed
            }
            Ok(Finish::Cancelled) => {
                self.finish(TaskState::Cancelled);
                self.sink.on_status(&format!("{}下载已取消", self.task.label));
                TaskOutcome::Cancelled
            }
            Err(e) => {
                self.finish(TaskState::Failed);
                error!("❌ {}下载失败: {}", self.task.label, e);
                self.sink.on_status(&e.to_string());
                TaskOutcome::Failed(e)
            }
        };

        TaskReport {
            task: self.task,
            outcome,
        }
    }

    fn finish(&mut self, state: TaskState) {
        if let Err(e) = self.task.advance(state) {
            warn!("{}", e);
        }
    }

    async fn run(&mut self) -> Result<Finish, DownloadError> {
        if let Some(parent) = self.task.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.task.temp_path();
        let first_byte = partial_size(&temp_path).await;
        if first_byte > 0 {
            info!("发现未完成的{}，从 {} 字节处继续", self.task.label, first_byte);
        }

        self.task.advance(TaskState::Requesting)?;

        let Some((mut response, mut transfer)) = self.request(first_byte).await? else {
            return Ok(Finish::Cancelled);
        };
        if transfer == Transfer::RangeMismatch {
            warn!("{}续传区间不一致，从头重新下载", self.task.label);
            let Some(retry) = self.request(0).await? else {
                return Ok(Finish::Cancelled);
            };
            (response, transfer) = retry;
        }

        let (offset, total) = match transfer {
            Transfer::Fresh { total } => (0, total),
            Transfer::Resume { offset, total } => (offset, total),
            Transfer::AlreadyComplete { total } => {
                self.task.set_progress(total, total);
                self.emit_progress(total, total, 0.0);
                fs::rename(&temp_path, &self.task.output_path).await?;
                return Ok(Finish::Completed);
            }
            Transfer::RangeMismatch => {
                return Err(DownloadError::Protocol("服务端不支持断点续传".to_string()));
            }
        };

        self.task.set_progress(offset, total);
        let mut file = if offset > 0 {
            fs::OpenOptions::new().append(true).open(&temp_path).await?
        } else {
            fs::File::create(&temp_path).await?
        };

        self.task.advance(TaskState::Streaming)?;
        let finish = self.stream_body(response, &mut file, offset, total).await;
        file.flush().await?;
        drop(file);

        match finish? {
            Finish::Cancelled => Ok(Finish::Cancelled),
            Finish::Completed => {
                let downloaded = self.task.downloaded();
                if total > 0 && downloaded != total {
                    return Err(DownloadError::Network(format!(
                        "连接提前结束: {}/{}",
                        downloaded, total
                    )));
                }
                // 同一文件系统内 rename，崩溃时不会留下半截的最终文件
                fs::rename(&temp_path, &self.task.output_path).await?;
                Ok(Finish::Completed)
            }
        }
    }

    /// 返回 `None` 表示请求期间被取消
    async fn request(&self, first_byte: u64) -> Result<Option<(Response, Transfer)>, DownloadError> {
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            resp = self.client.open(&self.task.url, first_byte) => resp?,
        };
        debug!("{} 响应状态: {}", self.task.label, response.status());

        let transfer = Transfer::resolve(response.status(), response.headers(), first_byte)?;
        Ok(Some((response, transfer)))
    }

    async fn stream_body(
        &mut self,
        response: Response,
        file: &mut fs::File,
        offset: u64,
        total: u64,
    ) -> Result<Finish, DownloadError> {
        let chunk_size = self.chunk_size;
        let started = Instant::now();
        let mut downloaded = offset;
        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::with_capacity(chunk_size);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };
            let Some(item) = next else {
                return Ok(Finish::Cancelled);
            };
            let Some(bytes) = item else {
                break;
            };
            buf.extend_from_slice(&bytes?);

            while buf.len() >= chunk_size {
                if self.cancel.is_cancelled() {
                    return Ok(Finish::Cancelled);
                }
                downloaded = self
                    .write_chunk(file, &buf[..chunk_size], downloaded, offset, total, started)
                    .await?;
                buf.drain(..chunk_size);
            }
        }

        if !buf.is_empty() {
            if self.cancel.is_cancelled() {
                return Ok(Finish::Cancelled);
            }
            self.write_chunk(file, &buf, downloaded, offset, total, started)
                .await?;
        }

        Ok(Finish::Completed)
    }

    async fn write_chunk(
        &mut self,
        file: &mut fs::File,
        chunk: &[u8],
        downloaded: u64,
        offset: u64,
        total: u64,
        started: Instant,
    ) -> Result<u64, DownloadError> {
        file.write_all(chunk).await?;
        let downloaded = downloaded + chunk.len() as u64;
        self.task.set_progress(downloaded, total);

        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            (downloaded - offset) as f64 / elapsed
        } else {
            0.0
        };
        self.emit_progress(downloaded, total, speed);
        Ok(downloaded)
    }

    fn emit_progress(&self, downloaded: u64, total: u64, speed_bps: f64) {
        let percent = percent_of(downloaded, total);
        self.sink
            .on_status(&chunk_status(&self.task.label, downloaded, total, percent, speed_bps));
        self.sink.on_progress(&ProgressEvent {
            label: self.task.label.clone(),
            percent,
            downloaded,
            total,
            speed_bps,
        });
    }
}

/// 临时文件当前大小，不存在或不是普通文件时为 0
pub async fn partial_size(path: &Path) -> u64 {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_fresh_total_from_content_length() {
        let h = headers(&[("content-length", "1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::OK, &h, 0).unwrap(),
            Transfer::Fresh { total: 1000 }
        );
    }

    #[test]
    fn test_full_content_on_resume_restarts() {
        let h = headers(&[("content-length", "1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::OK, &h, 400).unwrap(),
            Transfer::Fresh { total: 1000 }
        );
    }

    #[test]
    fn test_partial_content_total() {
        let h = headers(&[("content-length", "600")]);
        assert_eq!(
            Transfer::resolve(StatusCode::PARTIAL_CONTENT, &h, 400).unwrap(),
            Transfer::Resume { offset: 400, total: 1000 }
        );

        let h = headers(&[("content-length", "600"), ("content-range", "bytes 400-999/1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::PARTIAL_CONTENT, &h, 400).unwrap(),
            Transfer::Resume { offset: 400, total: 1000 }
        );
    }

    #[test]
    fn test_partial_content_wrong_offset() {
        let h = headers(&[("content-range", "bytes 0-999/1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::PARTIAL_CONTENT, &h, 400).unwrap(),
            Transfer::RangeMismatch
        );
    }

    #[test]
    fn test_missing_length_means_unknown_total() {
        assert_eq!(
            Transfer::resolve(StatusCode::OK, &HeaderMap::new(), 0).unwrap(),
            Transfer::Fresh { total: 0 }
        );
    }

    #[test]
    fn test_forbidden_is_auth_expired() {
        let err = Transfer::resolve(StatusCode::FORBIDDEN, &HeaderMap::new(), 0).unwrap_err();
        assert!(matches!(err, DownloadError::AuthExpired));
    }

    #[test]
    fn test_other_status_is_hard_failure() {
        let err = Transfer::resolve(StatusCode::NOT_FOUND, &HeaderMap::new(), 0).unwrap_err();
        assert!(matches!(err, DownloadError::UnexpectedStatus(404)));
    }

    #[test]
    fn test_range_not_satisfiable_when_already_complete() {
        let h = headers(&[("content-range", "bytes */1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::RANGE_NOT_SATISFIABLE, &h, 1000).unwrap(),
            Transfer::AlreadyComplete { total: 1000 }
        );
        assert!(Transfer::resolve(StatusCode::RANGE_NOT_SATISFIABLE, &HeaderMap::new(), 1000).is_err());
    }

    #[tokio::test]
    async fn test_partial_size_only_counts_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(partial_size(&dir.path().join("missing.tmp")).await, 0);
        assert_eq!(partial_size(dir.path()).await, 0);
        let file = dir.path().join("v.m4s.tmp");
        tokio::fs::write(&file, vec![0u8; 4321]).await.unwrap();
        assert_eq!(partial_size(&file).await, 4321);
    }

    #[test]
    fn test_oversized_temp_file_restarts() {
        let h = headers(&[("content-range", "bytes */1000")]);
        assert_eq!(
            Transfer::resolve(StatusCode::RANGE_NOT_SATISFIABLE, &h, 5000).unwrap(),
            Transfer::RangeMismatch
        );
        let h = headers(&[("content-range", "bytes */9000")]);
        assert!(Transfer::resolve(StatusCode::RANGE_NOT_SATISFIABLE, &h, 5000).is_err());
    }

    #[test]
    fn test_content_range_parse() {
        assert_eq!(
            ContentRange::parse("bytes 5-9/10"),
            Some(ContentRange { start: Some(5), total: Some(10) })
        );
        assert_eq!(
            ContentRange::parse("bytes */10"),
            Some(ContentRange { start: None, total: Some(10) })
        );
        assert_eq!(
            ContentRange::parse("bytes 5-9/*"),
            Some(ContentRange { start: Some(5), total: None })
        );
        assert_eq!(ContentRange::parse("items 1-2/3"), None);
    }
}
