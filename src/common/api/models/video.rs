use serde::Deserialize;

/// 通用响应外壳
#[derive(Debug, Deserialize)]
pub struct CommonResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub bvid: String,
    pub aid: u64,
    pub title: String,
    #[serde(default)]
    pub desc: String,
    pub owner: VideoOwner,
    pub pages: Vec<VideoPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoOwner {
    pub mid: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoPage {
    pub cid: u64,
    pub page: u32,
    pub part: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayUrlData {
    pub quality: Option<i32>,
    pub dash: Option<DashInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashInfo {
    pub video: Vec<DashItem>,
    pub audio: Option<Vec<DashItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashItem {
    pub id: i32,
    #[serde(rename = "baseUrl", alias = "base_url")]
    pub base_url: String,
}

/// 一对可以直接下载的音视频流地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrls {
    pub video_url: String,
    pub audio_url: String,
}
