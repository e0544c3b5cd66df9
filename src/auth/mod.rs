mod errors;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use cookie::Cookie;
use reqwest::header::HeaderValue;
use tracing::{debug, info, warn};

pub use errors::{AuthError, Result};

/// 登录后的关键 cookie
pub const SESSION_COOKIE: &str = "SESSDATA";

/// 登录凭证的只读快照
///
/// 扫码登录等流程产出的 cookie 在构造客户端时一次性传入，
/// 需要刷新时通过 [`Credentials::with_cookies`] 得到一个新的快照，
/// 已经交给客户端的旧快照不会被修改。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    cookies: Arc<BTreeMap<String, String>>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_map(cookies: BTreeMap<String, String>) -> Self {
        Self {
            cookies: Arc::new(cookies),
        }
    }

    /// 解析 `k1=v1; k2=v2` 形式的 cookie 字符串
    pub fn from_cookie_header(raw: &str) -> Result<Self> {
        let mut cookies = BTreeMap::new();
        for parsed in Cookie::split_parse(raw.trim()) {
            let cookie = parsed.map_err(|e| AuthError::InvalidCookie(e.to_string()))?;
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
        Ok(Self::from_map(cookies))
    }

    /// 读取登录流程保存的 cookie 文件（JSON 对象），文件不存在时返回匿名凭证
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            warn!("Cookie文件不存在: {:?}", path);
            return Ok(Self::anonymous());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let cookies: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        info!("已加载保存的登录信息, 共 {} 项", cookies.len());
        Ok(Self::from_map(cookies))
    }

    /// 合并新的 cookie，返回新快照
    pub fn with_cookies(&self, update: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut cookies = (*self.cookies).clone();
        cookies.extend(update);
        debug!("凭证已更新, 共 {} 项", cookies.len());
        Self::from_map(cookies)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn is_logged_in(&self) -> bool {
        self.cookies.contains_key(SESSION_COOKIE)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn cookie_header(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        HeaderValue::from_str(&self.cookie_string()).ok()
    }
}
