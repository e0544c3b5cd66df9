use serde::de::DeserializeOwned;
use tracing::{debug, error};

use super::models::video::{CommonResponse, PlayUrlData, StreamUrls, VideoInfo};
use crate::common::client::client::BiliClient;
use crate::common::client::error::ApiError;

pub const API_BASE: &str = "https://api.bilibili.com";

/// 视频信息与播放地址查询
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: BiliClient,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: BiliClient) -> Self {
        Self::with_base_url(client, API_BASE)
    }

    pub fn with_base_url(client: BiliClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn video_info(&self, bvid: &str) -> Result<VideoInfo, ApiError> {
        let url = format!("{}/x/web-interface/view?bvid={}", self.base_url, bvid);
        self.get(&url).await
    }

    /// 取 DASH 中排第一的视频流和音频流
    pub async fn play_url(&self, aid: u64, cid: u64, quality: u32) -> Result<StreamUrls, ApiError> {
        let url = format!(
            "{}/x/player/playurl?avid={}&cid={}&qn={}&fnver=0&fnval=80&fourk=1",
            self.base_url, aid, cid, quality
        );
        let data: PlayUrlData = self.get(&url).await?;
        debug!("实际清晰度: {:?}", data.quality);

        let dash = data
            .dash
            .ok_or_else(|| ApiError::UnsupportedFormat("没有 DASH 流".to_string()))?;
        let video = dash
            .video
            .first()
            .ok_or_else(|| ApiError::UnsupportedFormat("没有视频流".to_string()))?;
        let audio = dash
            .audio
            .as_ref()
            .and_then(|a| a.first())
            .ok_or_else(|| ApiError::UnsupportedFormat("没有音频流".to_string()))?;

        Ok(StreamUrls {
            video_url: video.base_url.clone(),
            audio_url: audio.base_url.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let resp = self.client.open(url, 0).await?;
        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::AuthExpired);
        }
        if !status.is_success() {
            return Err(ApiError::InvalidResponse(format!("请求失败，状态码: {}", status)));
        }

        let text = resp.text().await?;
        if text.is_empty() {
            return Err(ApiError::InvalidResponse("服务器返回空响应".to_string()));
        }

        let body: CommonResponse<T> = serde_json::from_str(&text).map_err(|e| {
            error!("JSON 结构匹配失败: {}, URL: {}", e, url);
            ApiError::from(e)
        })?;

        match body.code {
            0 => body
                .data
                .ok_or_else(|| ApiError::InvalidResponse("响应缺少 data 字段".to_string())),
            -403 | -101 => Err(ApiError::AuthExpired),
            code => Err(ApiError::ApiError(code, body.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> ApiClient {
        ApiClient::with_base_url(BiliClient::new(Credentials::anonymous()).unwrap(), server.uri())
    }

    #[tokio::test]
    async fn test_video_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/web-interface/view"))
            .and(query_param("bvid", "BV1xx411c7mD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"message":"0","data":{"bvid":"BV1xx411c7mD","aid":2,"title":"字幕君交流场所","desc":"","owner":{"mid":2,"name":"碧诗"},"pages":[{"cid":62131,"page":1,"part":"P1"}]}}"#,
            ))
            .mount(&server)
            .await;

        let info = api(&server).video_info("BV1xx411c7mD").await.unwrap();
        assert_eq!(info.aid, 2);
        assert_eq!(info.owner.name, "碧诗");
        assert_eq!(info.pages[0].cid, 62131);
    }

    #[tokio::test]
    async fn test_play_url_picks_first_streams() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/player/playurl"))
            .and(query_param("qn", "80"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"data":{"quality":80,"dash":{"video":[{"id":80,"baseUrl":"https://v1/a.m4s"},{"id":64,"baseUrl":"https://v2/b.m4s"}],"audio":[{"id":30280,"baseUrl":"https://a1/c.m4s"}]}}}"#,
            ))
            .mount(&server)
            .await;

        let urls = api(&server).play_url(2, 62131, 80).await.unwrap();
        assert_eq!(urls.video_url, "https://v1/a.m4s");
        assert_eq!(urls.audio_url, "https://a1/c.m4s");
    }

    #[tokio::test]
    async fn test_expired_cookie_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"code":-403,"message":"访问权限不足"}"#),
            )
            .mount(&server)
            .await;

        let err = api(&server).play_url(1, 2, 80).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthExpired));
    }

    #[tokio::test]
    async fn test_missing_dash_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0,"data":{"quality":16}}"#))
            .mount(&server)
            .await;

        let err = api(&server).play_url(1, 2, 16).await.unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));
    }
}
