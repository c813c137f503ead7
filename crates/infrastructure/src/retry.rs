use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

#[derive(Clone, Debug)]
pub enum Backoff {
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Backoff::Exponential { base, max }
    }

    /// 第 `attempt` 次失败之后的等待时间，从 1 开始计数
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base, max } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(200), Duration::from_secs(5)),
        }
    }
}

/// 启动阶段连接外部服务时使用，失败后按退避策略重试
pub async fn retry_async<F, Fut, T, E>(
    what: &'static str,
    config: &RetryConfig,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts {
                    tracing::error!(what, attempt, error = %e, "giving up");
                    return Err(e);
                }
                let delay = config.backoff.delay_at(attempt);
                tracing::warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                sleep(delay).await;
            }
        }
    }
}
