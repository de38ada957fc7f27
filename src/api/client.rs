// 后端API客户端实现

use crate::api::types::{
    AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, CompletedPartInfo,
    InitiateRequest, InitiateResponse, PartUrlRequest, PartUrlResponse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

/// 后端上传API接口
///
/// 上传引擎通过该接口与后端交互，测试中可替换为模拟实现
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// 创建分片上传会话
    async fn initiate_multipart_upload(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<InitiateResponse>;

    /// 获取单个分片的直传签名URL
    ///
    /// 签名URL可能为一次性或限时，每次尝试前都必须重新获取
    async fn get_part_upload_url(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u32,
    ) -> Result<String>;

    /// 完成分片上传（parts 必须按 partNumber 升序）
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPartInfo>,
    ) -> Result<CompleteResponse>;

    /// 中止分片上传（清理未完成的会话）
    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> Result<AbortResponse>;
}

/// 后端API客户端
#[derive(Debug, Clone)]
pub struct BackendClient {
    /// HTTP客户端
    client: Client,
    /// API 基础地址（如 "https://api.example.com/api/volume"）
    base_url: String,
    /// Bearer 认证令牌
    api_token: String,
}

impl BackendClient {
    /// 创建新的后端API客户端
    ///
    /// # 参数
    /// * `base_url` - API 基础地址
    /// * `api_token` - Bearer 认证令牌
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    /// 发送 JSON POST 请求并解析响应
    ///
    /// # 参数
    /// * `path` - 相对路径（如 "/multipart/initiate"）
    /// * `body` - 请求体
    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("请求发送失败: {}", path))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .with_context(|| format!("读取响应失败: {}", path))?;

        debug!("后端响应: path={}, status={}, body={}", path, status, response_text);

        if !status.is_success() {
            error!(
                "后端请求失败: path={}, status={}, body={}",
                path, status, response_text
            );
            anyhow::bail!("后端请求失败: {} - {}", status, response_text);
        }

        serde_json::from_str(&response_text)
            .with_context(|| format!("解析响应失败: path={}, body={}", path, response_text))
    }
}

#[async_trait]
impl UploadApi for BackendClient {
    async fn initiate_multipart_upload(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<InitiateResponse> {
        info!("创建上传会话: filename={}, size={}", filename, size);

        let request = InitiateRequest {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size,
        };

        let response: InitiateResponse = self.post_json("/multipart/initiate", &request).await?;

        if !response.is_valid() {
            anyhow::bail!("创建上传会话失败：未获取到 uploadId/key");
        }

        info!(
            "上传会话创建成功: uploadId={}..., key={}, partSize={:?}",
            &response.upload_id[..8.min(response.upload_id.len())],
            response.key,
            response.part_size
        );

        Ok(response)
    }

    async fn get_part_upload_url(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u32,
    ) -> Result<String> {
        let request = PartUrlRequest {
            upload_id: upload_id.to_string(),
            key: key.to_string(),
            part_number,
        };

        let response: PartUrlResponse = self.post_json("/multipart/part-url", &request).await?;

        if response.upload_url.is_empty() {
            anyhow::bail!("获取分片上传URL失败: part={}", part_number);
        }

        debug!("获取分片上传URL成功: part={}", part_number);

        Ok(response.upload_url)
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPartInfo>,
    ) -> Result<CompleteResponse> {
        info!(
            "完成上传会话: uploadId={}..., 分片数={}",
            &upload_id[..8.min(upload_id.len())],
            parts.len()
        );

        let request = CompleteRequest {
            upload_id: upload_id.to_string(),
            key: key.to_string(),
            parts,
        };

        let response: CompleteResponse = self.post_json("/multipart/complete", &request).await?;

        info!("上传会话完成: key={}, status={}", response.key, response.status);

        Ok(response)
    }

    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> Result<AbortResponse> {
        info!(
            "中止上传会话: uploadId={}..., key={}",
            &upload_id[..8.min(upload_id.len())],
            key
        );

        let request = AbortRequest {
            upload_id: upload_id.to_string(),
            key: key.to_string(),
        };

        self.post_json("/multipart/abort", &request).await
    }
}
