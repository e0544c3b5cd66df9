use std::time::Duration;

use reqwest::{
    Client, ClientBuilder, RequestBuilder, Response, Url,
    header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, RANGE, REFERER, USER_AGENT},
};
use tracing::{debug, warn};

use super::error::ApiError;
use super::retry::RetryPolicy;
use crate::auth::Credentials;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// 携带登录凭证、带自动重试的下载会话
#[derive(Debug, Clone)]
pub struct BiliClient {
    inner: Client,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl BiliClient {
    pub fn new(credentials: Credentials) -> Result<Self, ApiError> {
        Self::with_options(credentials, DEFAULT_TIMEOUT, RetryPolicy::default())
    }

    pub fn with_options(
        credentials: Credentials,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        // 连接超时和单次读取超时分开设置，大文件的总下载时长不受限制
        let inner = ClientBuilder::new()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers(Self::get_default_headers())
            .build()?;

        Ok(Self {
            inner,
            credentials,
            retry,
        })
    }

    /// 换一份凭证，连接池继续复用
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            inner: self.inner.clone(),
            credentials,
            retry: self.retry.clone(),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn get_default_headers() -> HeaderMap {
        // 创建默认请求头
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        // 媒体流按字节续传，不能让服务端压缩
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"));

        headers
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = self.credentials.cookie_header() {
            headers.insert(COOKIE, cookie);
        }
        headers
    }

    /// 发起 GET 请求；`resume_from > 0` 时带上 `Range: bytes=<n>-`
    ///
    /// 5xx/429 与连接错误按 [`RetryPolicy`] 重试，其余状态码原样返回给调用方判断。
    pub async fn open(&self, url: &str, resume_from: u64) -> Result<Response, ApiError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!("不支持的协议: {}", url.scheme())));
        }

        let mut headers = self.request_headers();
        if resume_from > 0 {
            let range = HeaderValue::from_str(&format!("bytes={}-", resume_from))
                .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
            headers.insert(RANGE, range);
            debug!("请求范围: bytes={}-", resume_from);
        }

        self.send_with_retry(|| self.inner.get(url.clone()).headers(headers.clone()))
            .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = match build().send().await {
                Ok(resp) if RetryPolicy::should_retry_status(resp.status()) => {
                    format!("HTTP {}", resp.status())
                }
                Ok(resp) => return Ok(resp),
                Err(e) if RetryPolicy::should_retry_error(&e) => e.to_string(),
                Err(e) => return Err(ApiError::Reqwest(e)),
            };

            if attempt >= self.retry.max_attempts {
                return Err(ApiError::RetriesExhausted {
                    attempts: attempt,
                    last,
                });
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                attempt,
                max = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "请求失败({})，稍后重试",
                last
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(credentials: Credentials) -> BiliClient {
        let retry = RetryPolicy::default().with_base_delay(Duration::from_millis(5));
        BiliClient::with_options(credentials, Duration::from_secs(5), retry).unwrap()
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 16]))
            .mount(&server)
            .await;

        let client = fast_client(Credentials::anonymous());
        let resp = client.open(&format!("{}/stream", server.uri()), 0).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = fast_client(Credentials::anonymous());
        let err = client.open(&server.uri(), 0).await.unwrap_err();
        assert!(matches!(err, ApiError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_forbidden_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = fast_client(Credentials::anonymous());
        let resp = client.open(&server.uri(), 0).await.unwrap();
        assert_eq!(resp.status(), 403);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sends_range_and_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=100-"))
            .and(header("cookie", "SESSDATA=abc"))
            .and(header("referer", "https://www.bilibili.com/"))
            .respond_with(ResponseTemplate::new(206))
            .mount(&server)
            .await;

        let creds = Credentials::from_cookie_header("SESSDATA=abc").unwrap();
        let client = fast_client(creds);
        let resp = client.open(&server.uri(), 100).await.unwrap();
        assert_eq!(resp.status(), 206);
    }

    #[tokio::test]
    async fn test_malformed_url_fails_immediately() {
        let client = fast_client(Credentials::anonymous());
        assert!(matches!(
            client.open("not a url", 0).await,
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            client.open("ftp://example.com/a.m4s", 0).await,
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
