// 分片传输层
//
// 将单个分片 PUT 到签名URL：
// - 请求体按小块流式发送，以便观测传输进度
// - 硬超时（默认3分钟）与软性慢速检测（自适应）相互独立
// - 从响应 ETag 头提取完整性标签（大小写不敏感，去除引号）

use crate::uploader::error::PartUploadError;
use crate::uploader::progress::PartProgressFn;
use crate::uploader::speed::SpeedTracker;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG};
use reqwest::{Body, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 流式请求体的单块大小: 64KB
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// 慢速检测轮询间隔（秒）
///
/// 实际判定频率由 SpeedTracker 的复查间隔进一步限制
const STALL_POLL_INTERVAL_SECS: u64 = 5;

/// 分片传输接口
///
/// 测试中可替换为模拟实现
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// 将一个分片 PUT 到签名URL
    ///
    /// # 参数
    /// * `url` - 分片直传签名URL
    /// * `part_number` - 分片序号
    /// * `data` - 分片数据（`Bytes` 引用计数缓冲，重试时克隆零拷贝）
    /// * `on_progress` - 分片进度回调
    ///
    /// # 返回
    /// 存储端返回的完整性标签（已去除引号）
    async fn put_part(
        &self,
        url: &str,
        part_number: u32,
        data: Bytes,
        on_progress: PartProgressFn,
    ) -> Result<String, PartUploadError>;
}

/// HTTP 分片传输实现
pub struct HttpPartTransport {
    /// HTTP客户端（不设全局超时，超时由 put_part 单独控制）
    client: Client,
    /// 单次传输硬超时
    part_timeout: Duration,
    /// 速度追踪器（慢速检测）
    speed: Arc<SpeedTracker>,
}

impl HttpPartTransport {
    /// 创建新的分片传输器
    ///
    /// # 参数
    /// * `part_timeout` - 单次传输硬超时
    /// * `speed` - 会话级速度追踪器
    pub fn new(part_timeout: Duration, speed: Arc<SpeedTracker>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            part_timeout,
            speed,
        })
    }

    /// 构建带进度上报的流式请求体
    fn progress_body(
        data: Bytes,
        part_number: u32,
        transferred: Arc<AtomicU64>,
        on_progress: PartProgressFn,
    ) -> Body {
        Body::wrap_stream(futures::stream::iter(progress_chunks(
            data,
            part_number,
            transferred,
            on_progress,
        )))
    }

    /// 慢速监视：检测到停滞时返回，从而中止传输
    async fn watch_stall(&self, part_number: u32, transferred: Arc<AtomicU64>) {
        loop {
            tokio::time::sleep(Duration::from_secs(STALL_POLL_INTERVAL_SECS)).await;
            if self
                .speed
                .should_abort_slow(part_number, transferred.load(Ordering::SeqCst))
            {
                return;
            }
        }
    }
}

#[async_trait]
impl PartTransport for HttpPartTransport {
    async fn put_part(
        &self,
        url: &str,
        part_number: u32,
        data: Bytes,
        on_progress: PartProgressFn,
    ) -> Result<String, PartUploadError> {
        let total = data.len() as u64;
        let transferred = Arc::new(AtomicU64::new(0));

        debug!("开始传输分片: part={}, 大小={} bytes", part_number, total);

        self.speed.start_tracking(part_number);
        let started = Instant::now();

        let body = Self::progress_body(
            data,
            part_number,
            transferred.clone(),
            on_progress.clone(),
        );

        // Content-Type 留空由调用方/存储端默认；签名URL通常不校验
        let send = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, total)
            .body(body)
            .send();

        let result = tokio::select! {
            outcome = tokio::time::timeout(self.part_timeout, send) => match outcome {
                Err(_) => Err(PartUploadError::Timeout {
                    part_number,
                    timeout_secs: self.part_timeout.as_secs(),
                }),
                Ok(Err(e)) => Err(classify_send_error(part_number, self.part_timeout, &e)),
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        etag_from_headers(response.headers(), part_number)
                    } else {
                        Err(PartUploadError::Transport {
                            part_number,
                            status: Some(status.as_u16()),
                            message: format!("HTTP {}", status),
                        })
                    }
                }
            },
            // 监视器返回即视为停滞，select 丢弃传输 future，中止请求
            _ = self.watch_stall(part_number, transferred.clone()) => {
                warn!("分片 {} 被慢速监视器中止", part_number);
                Err(PartUploadError::Stalled { part_number })
            }
        };

        match &result {
            Ok(e_tag) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.speed
                        .record_completed(part_number, total as f64 / elapsed);
                } else {
                    self.speed.stop_tracking(part_number);
                }
                // 补齐最终进度（流式上报可能停在缓冲边界）
                on_progress(part_number, total);
                debug!(
                    "分片传输成功: part={}, etag={}, 耗时={:.1}s",
                    part_number, e_tag, elapsed
                );
            }
            Err(e) => {
                self.speed.stop_tracking(part_number);
                debug!("分片传输失败: part={}, 错误={}", part_number, e);
            }
        }

        result
    }
}

/// 将分片数据切成小块，每块被拉取发送时累加并上报进度
fn progress_chunks(
    data: Bytes,
    part_number: u32,
    transferred: Arc<AtomicU64>,
    on_progress: PartProgressFn,
) -> impl Iterator<Item = std::io::Result<Bytes>> {
    let chunks = split_into_chunks(&data, BODY_CHUNK_SIZE);

    chunks.into_iter().map(move |chunk| {
        let sent =
            transferred.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        on_progress(part_number, sent);
        Ok(chunk)
    })
}

/// 按固定大小切分字节缓冲（零拷贝切片）
fn split_into_chunks(bytes: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + chunk_size).min(bytes.len());
        chunks.push(bytes.slice(offset..end));
        offset = end;
    }
    chunks
}

/// 从响应头提取完整性标签
///
/// 头名大小写不敏感（HeaderMap 保证），值两侧引号去除；
/// 缺失时视为硬失败：没有标签的分片无法进入 complete 调用
fn etag_from_headers(headers: &HeaderMap, part_number: u32) -> Result<String, PartUploadError> {
    let e_tag = headers
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty());

    e_tag.ok_or(PartUploadError::MissingEtag { part_number })
}

/// 归类 reqwest 发送错误
fn classify_send_error(
    part_number: u32,
    part_timeout: Duration,
    error: &reqwest::Error,
) -> PartUploadError {
    if error.is_timeout() {
        PartUploadError::Timeout {
            part_number,
            timeout_secs: part_timeout.as_secs(),
        }
    } else {
        PartUploadError::Transport {
            part_number,
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}
