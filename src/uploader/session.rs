// 上传会话记录
//
// 记录单个文件上传的生命周期与统计信息，
// 供调用方查询状态、持久化展示

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 上传会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSessionStatus {
    /// 等待开始
    Pending,
    /// 正在上传
    Uploading,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
    /// 已取消
    Cancelled,
}

/// 上传会话
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话ID
    pub id: String,
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件名
    pub filename: String,
    /// 文件总大小
    pub total_size: u64,
    /// 已上传大小
    pub uploaded_size: u64,
    /// 当前速度 (bytes/s)
    pub speed: u64,
    /// 会话状态
    pub status: UploadSessionStatus,
    /// 错误信息（失败时设置）
    pub error: Option<String>,
    /// 后端上传会话ID（initiate 成功后设置）
    pub upload_id: Option<String>,
    /// 对象存储键（initiate 成功后设置）
    pub key: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Local>,
    /// 开始时间
    pub started_at: Option<DateTime<Local>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Local>>,
}

impl UploadSession {
    /// 创建新的上传会话
    ///
    /// # 参数
    /// * `local_path` - 本地文件路径
    /// * `filename` - 文件名
    /// * `total_size` - 文件总大小
    pub fn new(local_path: PathBuf, filename: String, total_size: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            local_path,
            filename,
            total_size,
            uploaded_size: 0,
            speed: 0,
            status: UploadSessionStatus::Pending,
            error: None,
            upload_id: None,
            key: None,
            created_at: Local::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 标记开始上传
    pub fn mark_uploading(&mut self, upload_id: String, key: String) {
        self.status = UploadSessionStatus::Uploading;
        self.upload_id = Some(upload_id);
        self.key = Some(key);
        self.started_at = Some(Local::now());
    }

    /// 标记上传完成
    pub fn mark_completed(&mut self) {
        self.status = UploadSessionStatus::Completed;
        self.uploaded_size = self.total_size;
        self.speed = 0;
        self.completed_at = Some(Local::now());
    }

    /// 标记上传失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadSessionStatus::Failed;
        self.error = Some(error);
        self.speed = 0;
        self.completed_at = Some(Local::now());
    }

    /// 标记上传取消
    pub fn mark_cancelled(&mut self) {
        self.status = UploadSessionStatus::Cancelled;
        self.speed = 0;
        self.completed_at = Some(Local::now());
    }

    /// 更新进度统计
    pub fn update_progress(&mut self, uploaded_size: u64, speed: u64) {
        self.uploaded_size = uploaded_size.min(self.total_size);
        self.speed = speed;
    }

    /// 进度百分比 (0-100)
    pub fn progress(&self) -> f64 {
        if self.status == UploadSessionStatus::Completed {
            return 100.0;
        }
        if self.total_size == 0 {
            return 0.0;
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }

    /// 估算剩余时间（秒），无法估算时返回 None
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.uploaded_size >= self.total_size {
            return None;
        }
        Some((self.total_size - self.uploaded_size) / self.speed)
    }

    /// 会话是否已结束（完成/失败/取消）
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            UploadSessionStatus::Completed
                | UploadSessionStatus::Failed
                | UploadSessionStatus::Cancelled
        )
    }
}
