// Resumable Upload Rust Library
// 大文件分片断点上传客户端核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 后端上传API模块
pub mod api;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use api::{BackendClient, UploadApi};
pub use config::{AppConfig, LogConfig, UploadConfig};
pub use uploader::{
    HttpPartTransport, PartPlan, PartRetryCoordinator, PartState, PartTask, PartTransport,
    PartUploadError, ProgressAggregator, ProgressFn, SpeedTracker, UploadEngine, UploadOutcome,
    UploadProgress, UploadSession, UploadSessionStatus,
};
