use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, warn};

use fabric_errors::{FabricError, FabricResult};

/// 带指数退避的通用重试
///
/// 第 n 次尝试失败后等待 `2^(n-1) * base_timeout_ms` 毫秒再重试；
/// 达到 `max_retries` 次后将最后一次的原始错误原样返回。
/// 心跳调度使用同一退避算法。
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_retries: u32,
    base_timeout_ms: u64,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries {
                    error!("Exceeded max retries ({}): {}", max_retries, err);
                    return Err(err);
                }

                let delay_ms = 2u64.pow(attempt - 1) * base_timeout_ms;
                warn!("Attempt {} failed: {}", attempt, err);
                info!("Moving to attempt: {}", attempt + 1);
                info!("Waiting for: {}ms", delay_ms);

                sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// 对外 HTTP POST 的退避封装，非 2xx 状态按失败处理
pub async fn post_json_with_backoff(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &Value,
    max_retries: u32,
    base_timeout_ms: u64,
) -> FabricResult<Value> {
    let operation = || {
        let client = client.clone();
        let endpoint = endpoint.to_string();
        let payload = payload.clone();

        async move {
            let response = client
                .post(&endpoint)
                .json(&payload)
                .send()
                .await
                .map_err(|e| FabricError::network_error(format!("{endpoint}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FabricError::network_error(format!(
                    "{endpoint}: HTTP {status}"
                )));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| FabricError::serialization_error(e.to_string()))
        }
    };

    retry_with_backoff(max_retries, base_timeout_ms, operation)
        .await
        .map_err(|e| FabricError::exhausted_retries(max_retries, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    /// 每个连接回固定响应并立即关闭的最小 HTTP 服务
    async fn spawn_http_responder(
        status_line: &'static str,
        body: &'static str,
        hits: Arc<AtomicU32>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                hits.fetch_add(1, Ordering::SeqCst);

                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        endpoint
    }

    #[tokio::test]
    async fn test_success_needs_no_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<i32, FabricError> = retry_with_backoff(3, 100, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<&str, FabricError> = retry_with_backoff(5, 10, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FabricError::network_error("unavailable"))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surfaces_original_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let start = Instant::now();

        let result: Result<(), FabricError> = retry_with_backoff(3, 100, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FabricError::network_error("always down"))
            }
        })
        .await;

        // 恰好 3 次尝试，累计等待约 100 + 200 ms，最后原始错误透出
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(900));

        let err = result.unwrap_err();
        assert!(err.to_string().contains("always down"));
    }

    #[tokio::test]
    async fn test_post_json_success_needs_single_request() {
        let hits = Arc::new(AtomicU32::new(0));
        let endpoint = spawn_http_responder("200 OK", "{\"ok\":true}", hits.clone()).await;

        let client = reqwest::Client::new();
        let result = post_json_with_backoff(&client, &endpoint, &json!({ "job": "abc" }), 3, 10)
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_json_non_2xx_exhausts_retries() {
        let hits = Arc::new(AtomicU32::new(0));
        let endpoint =
            spawn_http_responder("500 Internal Server Error", "", hits.clone()).await;

        let client = reqwest::Client::new();
        let err = post_json_with_backoff(&client, &endpoint, &json!({ "job": "abc" }), 3, 10)
            .await
            .unwrap_err();

        // 非 2xx 按失败计：恰好 3 次请求，终态错误带上 HTTP 状态
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(matches!(err, FabricError::ExhaustedRetries { attempts: 3, .. }));
        assert!(err.to_string().contains("500"));
    }
}
