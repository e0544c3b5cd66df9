use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

/// 需要自动重试的服务端状态码
pub const RETRY_STATUS: [StatusCode; 5] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
];

/// 有限次数的指数退避重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次请求）
    pub max_attempts: u32,
    /// 第一次重试前的等待时间，之后每次翻倍
    pub base_delay: Duration,
    /// 单次等待的上限
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn should_retry_status(status: StatusCode) -> bool {
        RETRY_STATUS.contains(&status)
    }

    /// 连接层面的错误可以重试，构造请求或重定向错误则不行
    pub fn should_retry_error(e: &reqwest::Error) -> bool {
        e.is_connect() || e.is_timeout() || e.is_request()
    }

    /// 第 `attempt` 次失败（从 1 开始）之后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return delay;
        }

        let jitter_ms = (self.base_delay.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let extra = Duration::from_millis(rand::rng().random_range(0..jitter_ms));
        (delay + extra).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(40), Duration::from_secs(16));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let policy = RetryPolicy {
            jitter: true,
            max_delay: Duration::from_millis(1500),
            ..RetryPolicy::default()
        };
        for _ in 0..32 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_retry_status_set() {
        for code in [500u16, 502, 503, 504, 429] {
            assert!(RetryPolicy::should_retry_status(
                StatusCode::from_u16(code).unwrap()
            ));
        }
        for code in [200u16, 206, 401, 403, 404, 416] {
            assert!(!RetryPolicy::should_retry_status(
                StatusCode::from_u16(code).unwrap()
            ));
        }
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(RetryPolicy::default().with_attempts(0).max_attempts, 1);
    }
}
