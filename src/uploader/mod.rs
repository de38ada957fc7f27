// 分片上传模块

/// 上传编排引擎
pub mod engine;
/// 分片上传错误类型
pub mod error;
/// 分片切分与状态管理
pub mod part;
/// 聚合进度上报
pub mod progress;
/// 分片重试协调
pub mod retry;
/// 上传会话记录
pub mod session;
/// 速度追踪与慢速检测
pub mod speed;
/// 分片传输层
pub mod transport;

pub use engine::{UploadEngine, UploadOutcome};
pub use error::PartUploadError;
pub use part::{PartPlan, PartState, PartTask};
pub use progress::{PartProgressFn, ProgressAggregator, ProgressFn, UploadProgress};
pub use retry::{PartAttemptOutcome, PartRetryCoordinator};
pub use session::{UploadSession, UploadSessionStatus};
pub use speed::{SpeedTracker, StallPolicy};
pub use transport::{HttpPartTransport, PartTransport};
