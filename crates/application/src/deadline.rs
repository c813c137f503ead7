//! 外部协作方调用的超时约束

use std::future::Future;
use std::time::Duration;

use crate::error::ApplicationError;

/// 在限定时间内完成注册表或事件日志调用，超时视为存储不可用
pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, ApplicationError>
where
    F: Future<Output = Result<T, ApplicationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(operation, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(ApplicationError::store_unavailable(
                operation,
                format!("timed out after {}ms", limit.as_millis()),
            ))
        }
    }
}
