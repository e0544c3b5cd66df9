use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("重试 {attempts} 次后仍然失败: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("cookie已过期，请重新登录")]
    AuthExpired,

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("视频格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("B站 API 错误: {1}")]
    ApiError(i64, String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

/// 传输会话层面的错误与 API 错误共用一套类型
pub type TransferError = ApiError;
