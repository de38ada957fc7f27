// 分片重试协调
//
// 单次协调器调用内最多尝试 max_attempts_per_round 次：
// - 每次尝试前重新获取签名URL（URL可能为一次性或已过期）
// - 失败后按指数退避等待；慢速中止的退避不低于配置下限，
//   给拥塞的网络留出恢复时间
// - 终轮（is_last_attempt）耗尽后记录永久失败

use crate::api::UploadApi;
use crate::config::UploadConfig;
use crate::uploader::error::PartUploadError;
use crate::uploader::progress::PartProgressFn;
use crate::uploader::transport::PartTransport;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 单次协调器调用的结果
#[derive(Debug)]
pub struct PartAttemptOutcome {
    /// 分片序号
    pub part_number: u32,
    /// 成功时为完整性标签，失败时为最后一次尝试的错误
    pub result: Result<String, PartUploadError>,
}

/// 分片重试协调器
pub struct PartRetryCoordinator {
    /// 后端API（获取签名URL）
    api: Arc<dyn UploadApi>,
    /// 分片传输层
    transport: Arc<dyn PartTransport>,
    /// 上传配置
    config: UploadConfig,
}

impl PartRetryCoordinator {
    /// 创建新的重试协调器
    pub fn new(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
    ) -> Self {
        Self {
            api,
            transport,
            config,
        }
    }

    /// 上传单个分片，失败时在本次调用内重试
    ///
    /// # 参数
    /// * `upload_id` - 上传会话ID
    /// * `key` - 对象存储键
    /// * `part_number` - 分片序号
    /// * `data` - 分片数据（重试时克隆为引用计数，不复制缓冲）
    /// * `is_last_attempt` - 是否处于终轮（耗尽后不再有后续轮次）
    /// * `on_progress` - 分片进度回调
    ///
    /// # 返回
    /// 成功时为完整性标签；所有尝试耗尽后返回最后一次错误
    pub async fn upload_part_with_retry(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u32,
        data: Bytes,
        is_last_attempt: bool,
        on_progress: PartProgressFn,
    ) -> PartAttemptOutcome {
        let max_attempts = self.config.max_attempts_per_round.max(1);
        let mut last_error = PartUploadError::Transport {
            part_number,
            status: None,
            message: "未尝试".to_string(),
        };

        for attempt in 1..=max_attempts {
            debug!(
                "分片 {} 第 {}/{} 次尝试",
                part_number, attempt, max_attempts
            );

            // 每次尝试都重新获取签名URL
            let url = match self
                .api
                .get_part_upload_url(upload_id, key, part_number)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    last_error = PartUploadError::Transport {
                        part_number,
                        status: None,
                        message: format!("获取分片上传URL失败: {}", e),
                    };
                    self.backoff(&last_error, attempt, max_attempts).await;
                    continue;
                }
            };

            match self
                .transport
                .put_part(&url, part_number, data.clone(), on_progress.clone())
                .await
            {
                Ok(e_tag) => {
                    return PartAttemptOutcome {
                        part_number,
                        result: Ok(e_tag),
                    };
                }
                Err(e) => {
                    warn!(
                        "分片 {} 第 {}/{} 次尝试失败: {}",
                        part_number, attempt, max_attempts, e
                    );
                    self.backoff(&e, attempt, max_attempts).await;
                    last_error = e;
                }
            }
        }

        if is_last_attempt {
            error!("分片 {} 永久失败: {}", part_number, last_error);
        } else {
            warn!("分片 {} 本轮尝试耗尽，等待下一轮: {}", part_number, last_error);
        }

        PartAttemptOutcome {
            part_number,
            result: Err(last_error),
        }
    }

    /// 失败后退避（最后一次尝试之后不等待）
    async fn backoff(&self, error: &PartUploadError, attempt: u32, max_attempts: u32) {
        if attempt >= max_attempts {
            return;
        }

        let delay = calculate_backoff_delay(&self.config, error, attempt);
        debug!(
            "分片 {} 退避 {}ms 后重试",
            error.part_number(),
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}

/// 计算第 attempt 次尝试失败后的退避延迟
///
/// 指数退避：initial × 2^(attempt-1)，封顶于 backoff_max_ms；
/// 慢速中止的延迟另有下限 stall_min_backoff_ms
pub(crate) fn calculate_backoff_delay(
    config: &UploadConfig,
    error: &PartUploadError,
    attempt: u32,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let mut delay_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_max_ms);

    if error.is_stalled() {
        delay_ms = delay_ms.max(config.stall_min_backoff_ms);
    }

    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AbortResponse, CompleteResponse, CompletedPartInfo, InitiateResponse};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn transport_error(part_number: u32) -> PartUploadError {
        PartUploadError::Transport {
            part_number,
            status: Some(500),
            message: "internal".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = UploadConfig::default();
        let err = transport_error(1);

        assert_eq!(
            calculate_backoff_delay(&config, &err, 1),
            Duration::from_millis(1000)
        );
        assert_eq!(
            calculate_backoff_delay(&config, &err, 2),
            Duration::from_millis(2000)
        );
        assert_eq!(
            calculate_backoff_delay(&config, &err, 3),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let config = UploadConfig::default();
        let err = transport_error(1);

        // 1000 × 2^9 = 512000ms，封顶 30000ms
        assert_eq!(
            calculate_backoff_delay(&config, &err, 10),
            Duration::from_millis(config.backoff_max_ms)
        );
    }

    #[test]
    fn test_stall_backoff_has_floor() {
        let config = UploadConfig::default();
        let stalled = PartUploadError::Stalled { part_number: 1 };

        // 指数退避给出 1000ms，但慢速中止至少等 5000ms
        assert_eq!(
            calculate_backoff_delay(&config, &stalled, 1),
            Duration::from_millis(5000)
        );
        // 指数值超过下限后按指数值走
        assert_eq!(
            calculate_backoff_delay(&config, &stalled, 4),
            Duration::from_millis(8000)
        );
    }

    // ===== 协调器行为测试（模拟API与传输层） =====

    struct ScriptedApi {
        url_calls: AtomicU32,
    }

    #[async_trait]
    impl crate::api::UploadApi for ScriptedApi {
        async fn initiate_multipart_upload(
            &self,
            _filename: &str,
            _content_type: &str,
            _size: u64,
        ) -> Result<InitiateResponse> {
            unreachable!("协调器不应调用 initiate")
        }

        async fn get_part_upload_url(
            &self,
            _upload_id: &str,
            _key: &str,
            part_number: u32,
        ) -> Result<String> {
            let call = self.url_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("https://storage.example.com/part/{}?attempt={}", part_number, call))
        }

        async fn complete_multipart_upload(
            &self,
            _upload_id: &str,
            _key: &str,
            _parts: Vec<CompletedPartInfo>,
        ) -> Result<CompleteResponse> {
            unreachable!("协调器不应调用 complete")
        }

        async fn abort_multipart_upload(
            &self,
            _upload_id: &str,
            _key: &str,
        ) -> Result<AbortResponse> {
            unreachable!("协调器不应调用 abort")
        }
    }

    /// 前 N 次失败、之后成功的传输层，记录收到的URL
    struct FlakyTransport {
        fail_first: u32,
        calls: AtomicU32,
        seen_urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PartTransport for FlakyTransport {
        async fn put_part(
            &self,
            url: &str,
            part_number: u32,
            _data: Bytes,
            _on_progress: PartProgressFn,
        ) -> Result<String, PartUploadError> {
            self.seen_urls.lock().unwrap().push(url.to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(transport_error(part_number))
            } else {
                Ok(format!("etag-{}", part_number))
            }
        }
    }

    fn fast_config() -> UploadConfig {
        UploadConfig {
            initial_backoff_ms: 1,
            backoff_max_ms: 2,
            stall_min_backoff_ms: 1,
            ..UploadConfig::default()
        }
    }

    fn noop_progress() -> PartProgressFn {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let api = Arc::new(ScriptedApi {
            url_calls: AtomicU32::new(0),
        });
        let transport = Arc::new(FlakyTransport {
            fail_first: 2,
            calls: AtomicU32::new(0),
            seen_urls: Mutex::new(Vec::new()),
        });

        let coordinator =
            PartRetryCoordinator::new(api.clone(), transport.clone(), fast_config());
        let outcome = coordinator
            .upload_part_with_retry(
                "upload-1",
                "key-1",
                2,
                Bytes::from(vec![0u8; 8]),
                false,
                noop_progress(),
            )
            .await;

        assert_eq!(outcome.part_number, 2);
        assert_eq!(outcome.result.unwrap(), "etag-2");
        // 失败 2 次 + 成功 1 次 = 3 次URL获取，且每次URL都不同
        assert_eq!(api.url_calls.load(Ordering::SeqCst), 3);
        let urls = transport.seen_urls.lock().unwrap();
        assert_eq!(urls.len(), 3);
        assert_ne!(urls[0], urls[1]);
        assert_ne!(urls[1], urls[2]);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_returns_last_error() {
        let api = Arc::new(ScriptedApi {
            url_calls: AtomicU32::new(0),
        });
        let transport = Arc::new(FlakyTransport {
            fail_first: u32::MAX,
            calls: AtomicU32::new(0),
            seen_urls: Mutex::new(Vec::new()),
        });

        let coordinator =
            PartRetryCoordinator::new(api.clone(), transport, fast_config());
        let outcome = coordinator
            .upload_part_with_retry(
                "upload-1",
                "key-1",
                5,
                Bytes::from(vec![0u8; 8]),
                true,
                noop_progress(),
            )
            .await;

        assert_eq!(api.url_calls.load(Ordering::SeqCst), 3);
        let err = outcome.result.unwrap_err();
        assert_eq!(err.part_number(), 5);
        assert!(!err.is_stalled());
    }
}
