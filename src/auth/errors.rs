use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("IO操作失败: {0}")]
    IoError(#[from] std::io::Error),

    #[error("cookie文件格式错误: {0}")]
    InvalidCookieFile(#[from] serde_json::Error),

    #[error("cookie字符串格式错误: {0}")]
    InvalidCookie(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
