// 后端上传API模块
//
// 后端负责：创建分片上传会话、为单个分片签发直传 URL、
// 完成/中止整个会话。分片数据本身不经过后端，
// 由上传引擎直接 PUT 到签名 URL

pub mod client;
pub mod types;

pub use client::{BackendClient, UploadApi};
pub use types::{
    AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, CompletedPartInfo,
    InitiateRequest, InitiateResponse, PartUrlRequest, PartUrlResponse,
};
