use thiserror::Error;

use crate::common::client::error::ApiError;

/// 失败分类，调用方据此决定是重新登录、重试还是检查磁盘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    AuthExpired,
    Io,
    Protocol,
    Unexpected,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("下载失败：cookie已过期，请重新登录")]
    AuthExpired,

    #[error("网络错误：{0}")]
    Network(String),

    #[error("文件写入错误：{0}")]
    Io(#[from] std::io::Error),

    #[error("下载失败：HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("响应格式错误：{0}")]
    Protocol(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("无效的状态: {0}")]
    InvalidState(String),

    #[error("下载出错: {0}")]
    Unexpected(String),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::Network(_) => ErrorKind::TransientNetwork,
            Self::Io(_) => ErrorKind::Io,
            Self::UnexpectedStatus(_) | Self::Protocol(_) | Self::InvalidUrl(_) => ErrorKind::Protocol,
            Self::InvalidState(_) | Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DownloadError::Network(format!("请求超时，请检查网络连接: {}", error))
        } else {
            DownloadError::Network(error.to_string())
        }
    }
}

impl From<ApiError> for DownloadError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::AuthExpired => DownloadError::AuthExpired,
            ApiError::InvalidUrl(url) => DownloadError::InvalidUrl(url),
            ApiError::Reqwest(e) => DownloadError::from(e),
            e @ ApiError::RetriesExhausted { .. } => DownloadError::Network(e.to_string()),
            e => DownloadError::Protocol(e.to_string()),
        }
    }
}
