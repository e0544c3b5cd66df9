pub mod coordinator;
pub mod core;
pub mod error;
pub mod models;
pub mod progress;
pub mod task;

pub use self::coordinator::{BatchHandle, BatchReport, DualStreamCoordinator, JoinLatch};
pub use self::core::{ResumableDownloader, TaskOutcome, TaskReport, Transfer, partial_size};
pub use error::{DownloadError, ErrorKind};
pub use models::{BatchLayout, BatchOutcome, CHUNK_SIZE, DownloadBatch, DownloadConfig, FileType};
pub use progress::{ConsoleSink, LogSink, ProgressEvent, ProgressSink};
pub use task::{DownloadTask, TaskState};
