// 分片上传错误类型
//
// 慢速中止与普通传输失败通过枚举变体区分，
// 重试协调器据此选择退避策略，不做错误消息字符串匹配

use thiserror::Error;

/// 分片上传错误
#[derive(Debug, Clone, Error)]
pub enum PartUploadError {
    /// 传输超时（可重试）
    #[error("分片 {part_number} 传输超时（{timeout_secs}秒）")]
    Timeout { part_number: u32, timeout_secs: u64 },

    /// 慢速中止：速度远低于其他分片的平均值，主动放弃本次传输（可重试，退避有下限）
    #[error("分片 {part_number} 速度过慢，已主动中止")]
    Stalled { part_number: u32 },

    /// 传输失败：网络错误或非 2xx 状态码（可重试）
    #[error("分片 {part_number} 上传失败: {message}")]
    Transport {
        part_number: u32,
        /// HTTP 状态码（网络层错误时为 None）
        status: Option<u16>,
        message: String,
    },

    /// 响应缺少 ETag 头：虽然 HTTP 成功，但没有完整性标签就无法完成会话（可重试）
    #[error("分片 {part_number} 响应缺少 ETag 头")]
    MissingEtag { part_number: u32 },
}

impl PartUploadError {
    /// 所属分片序号
    pub fn part_number(&self) -> u32 {
        match self {
            PartUploadError::Timeout { part_number, .. } => *part_number,
            PartUploadError::Stalled { part_number } => *part_number,
            PartUploadError::Transport { part_number, .. } => *part_number,
            PartUploadError::MissingEtag { part_number } => *part_number,
        }
    }

    /// 是否为慢速中止
    pub fn is_stalled(&self) -> bool {
        matches!(self, PartUploadError::Stalled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_number_extraction() {
        let err = PartUploadError::Transport {
            part_number: 7,
            status: Some(503),
            message: "service unavailable".to_string(),
        };
        assert_eq!(err.part_number(), 7);
        assert!(!err.is_stalled());
    }

    #[test]
    fn test_stalled_classification() {
        // 分类依据变体本身，与错误消息文本无关
        let err = PartUploadError::Stalled { part_number: 3 };
        assert!(err.is_stalled());
        assert_eq!(err.part_number(), 3);
    }

    #[test]
    fn test_missing_etag_is_not_stalled() {
        let err = PartUploadError::MissingEtag { part_number: 1 };
        assert!(!err.is_stalled());
    }
}
