// 上传编排引擎
//
// 单个文件的完整上传流程：
// 1. initiate 创建会话，取得 uploadId/key 与后端指定的分片大小
// 2. 预切分所有分片并检查数量上限（超限则在任何分片请求前失败）
// 3. 首轮并发上传全部分片（信号量限制并发数）
// 4. 失败分片按轮重试，最多 retry_rounds 轮，末轮为终轮
// 5. 全部成功后按分片序号升序提交 complete；100% 进度只在此之后上报
// 6. 任何不可恢复失败后尽力中止会话（中止失败仅记日志，不掩盖原错误）

use crate::api::UploadApi;
use crate::config::UploadConfig;
use crate::uploader::error::PartUploadError;
use crate::uploader::part::PartPlan;
use crate::uploader::progress::{PartProgressFn, ProgressAggregator, ProgressFn};
use crate::uploader::retry::{PartAttemptOutcome, PartRetryCoordinator};
use crate::uploader::session::UploadSession;
use crate::uploader::speed::{SpeedTracker, StallPolicy};
use crate::uploader::transport::{HttpPartTransport, PartTransport};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上传成功的结果
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// 后端上传会话ID
    pub upload_id: String,
    /// 对象存储键
    pub key: String,
}

/// 上传编排引擎
///
/// 每个实例负责一个文件的一次上传
pub struct UploadEngine {
    /// 后端API
    api: Arc<dyn UploadApi>,
    /// 分片传输层
    transport: Arc<dyn PartTransport>,
    /// 上传配置
    config: UploadConfig,
    /// 上传会话记录
    session: Arc<Mutex<UploadSession>>,
    /// 取消令牌
    cancel_token: CancellationToken,
}

impl UploadEngine {
    /// 创建新的上传引擎
    ///
    /// # 参数
    /// * `api` - 后端API客户端
    /// * `config` - 上传配置
    /// * `local_path` - 待上传的本地文件路径
    pub async fn new(
        api: Arc<dyn UploadApi>,
        config: UploadConfig,
        local_path: PathBuf,
    ) -> Result<Self> {
        let metadata = tokio::fs::metadata(&local_path)
            .await
            .with_context(|| format!("读取文件元数据失败: {}", local_path.display()))?;
        anyhow::ensure!(metadata.is_file(), "路径不是文件: {}", local_path.display());

        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .ok_or_else(|| anyhow::anyhow!("无法解析文件名: {}", local_path.display()))?;

        let session = UploadSession::new(local_path, filename, metadata.len());

        let policy = StallPolicy {
            speed_ratio: config.stall_speed_ratio,
            grace_secs: config.stall_grace_secs,
            check_interval_secs: config.stall_check_interval_secs,
            min_samples: config.stall_min_samples,
        };
        let speed = Arc::new(SpeedTracker::new(policy));
        let transport = Arc::new(HttpPartTransport::new(
            Duration::from_secs(config.part_timeout_secs),
            speed,
        )?);

        Ok(Self::with_transport(api, transport, config, session))
    }

    /// 使用指定的传输层创建引擎（测试用注入点）
    pub fn with_transport(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
        session: UploadSession,
    ) -> Self {
        Self {
            api,
            transport,
            config,
            session: Arc::new(Mutex::new(session)),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 上传会话记录
    pub fn session(&self) -> Arc<Mutex<UploadSession>> {
        self.session.clone()
    }

    /// 取消上传
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 执行上传
    ///
    /// # 参数
    /// * `on_progress` - 聚合进度回调（可选）
    ///
    /// # 返回
    /// 全部分片上传并 complete 成功后返回 `UploadOutcome`
    pub async fn upload(&self, on_progress: Option<ProgressFn>) -> Result<UploadOutcome> {
        let (local_path, filename, total_size) = {
            let session = self.session.lock().await;
            (
                session.local_path.clone(),
                session.filename.clone(),
                session.total_size,
            )
        };

        info!("开始上传: {} ({} bytes)", filename, total_size);

        let initiate = self
            .api
            .initiate_multipart_upload(&filename, "application/octet-stream", total_size)
            .await
            .context("创建上传会话失败")?;
        let upload_id = initiate.upload_id.clone();
        let key = initiate.key.clone();

        {
            let mut session = self.session.lock().await;
            session.mark_uploading(upload_id.clone(), key.clone());
        }

        let part_size = initiate
            .part_size
            .filter(|size| *size > 0)
            .unwrap_or(self.config.default_part_size);

        // 分片数量超限在任何分片请求之前失败
        let plan = match PartPlan::new(total_size, part_size, self.config.max_total_parts) {
            Ok(plan) => plan,
            Err(e) => {
                self.session.lock().await.mark_failed(e.to_string());
                return Err(e);
            }
        };

        match self
            .run_session(plan, &local_path, &upload_id, &key, on_progress)
            .await
        {
            Ok(outcome) => {
                self.session.lock().await.mark_completed();
                info!("上传完成: {} -> {}", filename, outcome.key);
                Ok(outcome)
            }
            Err(e) => {
                // 尽力中止会话，中止失败不掩盖原错误
                self.abort_best_effort(&upload_id, &key).await;

                let mut session = self.session.lock().await;
                if self.cancel_token.is_cancelled() {
                    session.mark_cancelled();
                } else {
                    session.mark_failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// 首轮 + 重试轮 + complete
    async fn run_session(
        &self,
        mut plan: PartPlan,
        local_path: &Path,
        upload_id: &str,
        key: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadOutcome> {
        let aggregator = Arc::new(ProgressAggregator::new(plan.total_size()));
        for part in plan.parts() {
            aggregator.register_part(part.part_number);
        }

        let part_progress = self.part_progress_fn(aggregator.clone(), on_progress.clone());
        let coordinator = Arc::new(PartRetryCoordinator::new(
            self.api.clone(),
            self.transport.clone(),
            self.config.clone(),
        ));

        // 首轮：全部分片
        let all_parts: Vec<u32> = plan.parts().iter().map(|p| p.part_number).collect();
        self.run_round(
            &mut plan,
            &all_parts,
            false,
            local_path,
            upload_id,
            key,
            &coordinator,
            &part_progress,
        )
        .await?;

        // 重试轮：只重试失败分片，末轮为终轮
        for round in 1..=self.config.retry_rounds {
            let failed = plan.failed_part_numbers();
            if failed.is_empty() {
                break;
            }

            let is_last = round == self.config.retry_rounds;
            info!(
                "第 {}/{} 轮重试: {} 个失败分片 {:?}",
                round,
                self.config.retry_rounds,
                failed.len(),
                failed
            );
            self.run_round(
                &mut plan,
                &failed,
                is_last,
                local_path,
                upload_id,
                key,
                &coordinator,
                &part_progress,
            )
            .await?;
        }

        let remaining = plan.failed_part_numbers();
        if !remaining.is_empty() {
            anyhow::bail!("以下分片在所有重试后仍然失败: {:?}", remaining);
        }

        let parts = plan.completed_parts()?;
        self.api
            .complete_multipart_upload(upload_id, key, parts)
            .await
            .context("完成上传会话失败")?;

        // complete 成功后才上报 100%
        let done = aggregator.finished();
        if let Ok(mut session) = self.session.try_lock() {
            session.update_progress(done.uploaded_bytes, 0);
        }
        if let Some(callback) = &on_progress {
            callback(done);
        }

        Ok(UploadOutcome {
            upload_id: upload_id.to_string(),
            key: key.to_string(),
        })
    }

    /// 并发执行一轮分片上传，结果写回分片计划
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        plan: &mut PartPlan,
        part_numbers: &[u32],
        is_last_attempt: bool,
        local_path: &Path,
        upload_id: &str,
        key: &str,
        coordinator: &Arc<PartRetryCoordinator>,
        on_part_progress: &PartProgressFn,
    ) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            anyhow::bail!("上传已取消");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_parts.max(1)));
        let mut join_set = JoinSet::new();

        for &part_number in part_numbers {
            let Some(part) = plan.part(part_number) else {
                continue;
            };
            let part = part.clone();
            plan.mark_uploading(part_number);

            let semaphore = semaphore.clone();
            let coordinator = coordinator.clone();
            let local_path = local_path.to_path_buf();
            let upload_id = upload_id.to_string();
            let key = key.to_string();
            let on_progress = on_part_progress.clone();
            let cancel = self.cancel_token.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return PartAttemptOutcome {
                            part_number,
                            result: Err(PartUploadError::Transport {
                                part_number,
                                status: None,
                                message: "并发许可已关闭".to_string(),
                            }),
                        }
                    }
                };

                let data = match part.read_data(&local_path).await {
                    Ok(data) => Bytes::from(data),
                    Err(e) => {
                        return PartAttemptOutcome {
                            part_number,
                            result: Err(PartUploadError::Transport {
                                part_number,
                                status: None,
                                message: format!("读取分片数据失败: {}", e),
                            }),
                        }
                    }
                };

                tokio::select! {
                    outcome = coordinator.upload_part_with_retry(
                        &upload_id,
                        &key,
                        part_number,
                        data,
                        is_last_attempt,
                        on_progress,
                    ) => outcome,
                    _ = cancel.cancelled() => PartAttemptOutcome {
                        part_number,
                        result: Err(PartUploadError::Transport {
                            part_number,
                            status: None,
                            message: "上传已取消".to_string(),
                        }),
                    },
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let outcome = joined.context("分片任务异常退出")?;
            match outcome.result {
                Ok(e_tag) => plan.mark_succeeded(outcome.part_number, e_tag),
                Err(e) => {
                    debug!("分片 {} 本轮失败: {}", outcome.part_number, e);
                    plan.mark_failed(outcome.part_number);
                }
            }
        }

        if self.cancel_token.is_cancelled() {
            anyhow::bail!("上传已取消");
        }
        Ok(())
    }

    /// 分片进度回调：聚合后同步到会话记录与调用方回调
    fn part_progress_fn(
        &self,
        aggregator: Arc<ProgressAggregator>,
        on_progress: Option<ProgressFn>,
    ) -> PartProgressFn {
        let session = self.session.clone();
        Arc::new(move |part_number, transferred_bytes| {
            let progress = aggregator.update(part_number, transferred_bytes);
            // 拿不到锁就跳过本次同步，下次上报会补上
            if let Ok(mut session) = session.try_lock() {
                session.update_progress(progress.uploaded_bytes, progress.speed);
            }
            if let Some(callback) = &on_progress {
                callback(progress);
            }
        })
    }

    async fn abort_best_effort(&self, upload_id: &str, key: &str) {
        if let Err(e) = self.api.abort_multipart_upload(upload_id, key).await {
            warn!("中止上传会话失败（忽略）: {}", e);
        }
    }
}
