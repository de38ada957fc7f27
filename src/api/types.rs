// 后端API数据类型
//
// 字段名遵循后端契约的 camelCase 命名

use serde::{Deserialize, Serialize};

/// 创建分片上传会话请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// 文件名
    pub filename: String,

    /// 文件 MIME 类型
    pub content_type: String,

    /// 文件大小（字节）
    pub size: u64,
}

/// 创建分片上传会话响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    /// 上传会话ID（后端/存储分配，不透明）
    pub upload_id: String,

    /// 目标对象键（不透明）
    pub key: String,

    /// 分片大小（字节），后端未指定时由客户端使用默认值
    #[serde(default)]
    pub part_size: Option<u64>,
}

impl InitiateResponse {
    /// 会话是否有效
    pub fn is_valid(&self) -> bool {
        !self.upload_id.is_empty() && !self.key.is_empty()
    }
}

/// 获取分片上传URL请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlRequest {
    /// 上传会话ID
    pub upload_id: String,

    /// 目标对象键
    pub key: String,

    /// 分片序号（从1开始）
    pub part_number: u32,
}

/// 获取分片上传URL响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlResponse {
    /// 分片直传签名URL（可能为一次性或限时）
    pub upload_url: String,
}

/// 已完成分片信息
///
/// complete 请求中的 parts 数组元素，必须按 partNumber 升序排列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartInfo {
    /// 分片序号（从1开始）
    pub part_number: u32,

    /// 存储端返回的完整性标签
    pub e_tag: String,
}

/// 完成分片上传请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// 上传会话ID
    pub upload_id: String,

    /// 目标对象键
    pub key: String,

    /// 所有分片的完整性标签，按 partNumber 升序
    pub parts: Vec<CompletedPartInfo>,
}

/// 完成分片上传响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    /// 状态
    #[serde(default)]
    pub status: String,

    /// 最终对象键
    #[serde(default)]
    pub key: String,
}

/// 中止分片上传请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    /// 上传会话ID
    pub upload_id: String,

    /// 目标对象键
    pub key: String,
}

/// 中止分片上传响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortResponse {
    /// 状态
    #[serde(default)]
    pub status: String,
}
