// 聚合进度上报
//
// 多个分片的进度回调会并发、乱序、重复地到达。
// 聚合值每次都从 分片序号 -> 已传输字节数 的映射整体重算，
// 因此对乱序与重复上报天然幂等，且总量始终钳制在文件大小内

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

/// 聚合进度快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    /// 进度百分比 (0-100)
    pub percent: f64,
    /// 已上传字节数（钳制在文件大小内）
    pub uploaded_bytes: u64,
    /// 文件总字节数
    pub total_bytes: u64,
    /// 整体平均速度 (bytes/s)
    pub speed: u64,
    /// 估算剩余时间（秒），无法估算时为 0
    pub eta_secs: u64,
}

/// 会话级进度回调
pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// 分片级进度回调：(分片序号, 本次尝试已传输字节数)
pub type PartProgressFn = Arc<dyn Fn(u32, u64) + Send + Sync>;

/// 进度聚合器
#[derive(Debug)]
pub struct ProgressAggregator {
    /// 文件总大小
    total_bytes: u64,
    /// 分片序号 -> 已传输字节数
    part_bytes: DashMap<u32, u64>,
    /// 会话开始时间（用于整体速度/ETA估算）
    started_at: Instant,
}

impl ProgressAggregator {
    /// 创建新的进度聚合器
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            part_bytes: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// 注册分片（初始已传输字节数为 0）
    pub fn register_part(&self, part_number: u32) {
        self.part_bytes.insert(part_number, 0);
    }

    /// 上报单个分片的进度并返回最新聚合快照
    ///
    /// # 参数
    /// * `part_number` - 分片序号
    /// * `transferred_bytes` - 该分片本次尝试已传输的字节数
    pub fn update(&self, part_number: u32, transferred_bytes: u64) -> UploadProgress {
        self.part_bytes.insert(part_number, transferred_bytes);
        self.snapshot()
    }

    /// 当前聚合快照
    pub fn snapshot(&self) -> UploadProgress {
        let raw_sum: u64 = self.part_bytes.iter().map(|entry| *entry.value()).sum();
        let uploaded = raw_sum.min(self.total_bytes);

        // 100% 只在 finished() 中出现：所有字节传完不等于会话完成，
        // 还差 complete 调用确认
        let percent = if self.total_bytes == 0 {
            0.0
        } else {
            ((uploaded as f64 / self.total_bytes as f64) * 100.0).min(99.9)
        };

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            (uploaded as f64 / elapsed) as u64
        } else {
            0
        };

        let eta_secs = if speed > 0 && uploaded < self.total_bytes {
            (self.total_bytes - uploaded) / speed
        } else {
            0
        };

        UploadProgress {
            percent,
            uploaded_bytes: uploaded,
            total_bytes: self.total_bytes,
            speed,
            eta_secs,
        }
    }

    /// 完成快照：全部上传完毕后上报 100%
    pub fn finished(&self) -> UploadProgress {
        UploadProgress {
            percent: 100.0,
            uploaded_bytes: self.total_bytes,
            total_bytes: self.total_bytes,
            speed: 0,
            eta_secs: 0,
        }
    }
}
