use std::fmt;

// 视频清晰度选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoQuality {
    Q360P = 16,     // 流畅 360P
    Q480P = 32,     // 清晰 480P
    Q720P = 64,     // 高清 720P
    #[default]
    Q1080P = 80,    // 高清 1080P
    Q1080PP = 112,  // 高清 1080P+
    Q1080P60 = 116, // 高清 1080P60
    Q4K = 120,      // 超清 4K
    QHdr = 125,     // HDR 真彩色
    Q8K = 127,      // 超高清 8K
}

impl VideoQuality {
    pub fn from_qn(qn: u32) -> Option<Self> {
        match qn {
            16 => Some(Self::Q360P),
            32 => Some(Self::Q480P),
            64 => Some(Self::Q720P),
            80 => Some(Self::Q1080P),
            112 => Some(Self::Q1080PP),
            116 => Some(Self::Q1080P60),
            120 => Some(Self::Q4K),
            125 => Some(Self::QHdr),
            127 => Some(Self::Q8K),
            _ => None,
        }
    }

    pub fn qn(self) -> u32 {
        self as u32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Q360P => "流畅 360P",
            Self::Q480P => "清晰 480P",
            Self::Q720P => "高清 720P",
            Self::Q1080P => "高清 1080P",
            Self::Q1080PP => "高清 1080P+",
            Self::Q1080P60 => "高清 1080P60",
            Self::Q4K => "超清 4K",
            Self::QHdr => "HDR 真彩色",
            Self::Q8K => "超高清 8K",
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.qn())
    }
}
