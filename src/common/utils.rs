use std::sync::LazyLock;

use regex::Regex;

static BVID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BV[0-9A-Za-z]{10}").expect("BV号正则无效"));

pub struct FormatTool;

impl FormatTool {
    // 格式化文件大小
    pub fn format_size(size: u64) -> String {
        let mut value = size as f64;
        for unit in ["B", "KB", "MB", "GB"] {
            if value < 1024.0 {
                return format!("{:.2}{}", value, unit);
            }
            value /= 1024.0;
        }
        format!("{:.2}TB", value)
    }

    // 格式化下载速度，统一用 MB/s
    pub fn format_speed(bytes_per_sec: f64) -> String {
        format!("{:.2}MB/s", bytes_per_sec / (1024.0 * 1024.0))
    }
}

/// 去掉文件名里的非法字符，只保留字母数字、空格、`-` 和 `_`
pub fn sanitize_title(title: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe = safe.trim_end();
    if safe.is_empty() {
        "video".to_string()
    } else {
        safe.to_string()
    }
}

/// 从 BV 号或视频页面链接里取出 BV 号
pub fn extract_bvid(input: &str) -> Option<String> {
    BVID_RE.find(input).map(|m| m.as_str().to_string())
}
