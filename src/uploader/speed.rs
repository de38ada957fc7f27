// 分片速度追踪与慢速检测
//
// 复用服务器健康管理器的设计思路：用已完成分片的吞吐量
// 作为基准，判断当前分片是否异常缓慢
//
// 统一的固定超时无法区分"这个分片的连接病态地慢"和
// "整个网络都在高负载"；与同会话其他分片的实测速度对比
// 可以在不依赖服务端信号的情况下自适应当前网络状况

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// 慢速检测参数
#[derive(Debug, Clone, Copy)]
pub struct StallPolicy {
    /// 慢速判定比例：当前速度 < 平均速度 × ratio 时视为停滞
    pub speed_ratio: f64,
    /// 宽限期（秒）：分片开始传输后至少等待该时长再判定
    pub grace_secs: u64,
    /// 复查间隔（秒）：单分片两次判定之间的最小间隔
    pub check_interval_secs: u64,
    /// 最少样本数：已完成分片不足该数量时不判定
    pub min_samples: usize,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            speed_ratio: 0.3,
            grace_secs: 20,
            check_interval_secs: 15,
            min_samples: 2,
        }
    }
}

/// 分片速度追踪器
///
/// 样本集只增不减：会话生命周期短，无需淘汰
#[derive(Debug)]
pub struct SpeedTracker {
    /// 慢速检测参数
    policy: StallPolicy,
    /// 已完成分片的吞吐量样本（bytes/s）
    samples: Mutex<Vec<f64>>,
    /// 正在传输的分片 -> 本次尝试开始时间
    active: DashMap<u32, Instant>,
    /// 分片 -> 上次慢速判定时间（限制判定频率）
    last_check: DashMap<u32, Instant>,
}

impl SpeedTracker {
    /// 创建新的速度追踪器
    pub fn new(policy: StallPolicy) -> Self {
        Self {
            policy,
            samples: Mutex::new(Vec::new()),
            active: DashMap::new(),
            last_check: DashMap::new(),
        }
    }

    /// 开始追踪分片的本次尝试
    pub fn start_tracking(&self, part_number: u32) {
        self.start_tracking_at(part_number, Instant::now());
    }

    fn start_tracking_at(&self, part_number: u32, now: Instant) {
        self.active.insert(part_number, now);
        self.last_check.remove(&part_number);
    }

    /// 停止追踪分片（尝试失败或被中止时调用）
    pub fn stop_tracking(&self, part_number: u32) {
        self.active.remove(&part_number);
        self.last_check.remove(&part_number);
    }

    /// 记录分片完成时的吞吐量并移除追踪
    ///
    /// # 参数
    /// * `part_number` - 分片序号
    /// * `bytes_per_sec` - 本次分片的平均吞吐量（bytes/s）
    pub fn record_completed(&self, part_number: u32, bytes_per_sec: f64) {
        if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
            let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.push(bytes_per_sec);
        }
        self.stop_tracking(part_number);

        debug!(
            "记录分片速度: part={}, 速度={:.2} KB/s",
            part_number,
            bytes_per_sec / 1024.0
        );
    }

    /// 已完成分片的平均吞吐量
    ///
    /// 样本数不足时返回 None
    pub fn average_speed(&self) -> Option<f64> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() < self.policy.min_samples {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// 判断当前分片是否应因慢速而中止重试
    ///
    /// # 参数
    /// * `part_number` - 分片序号
    /// * `transferred_bytes` - 本次尝试已传输的字节数
    ///
    /// # 返回
    /// true 表示分片速度远低于同会话平均值，应中止并重试
    pub fn should_abort_slow(&self, part_number: u32, transferred_bytes: u64) -> bool {
        self.should_abort_slow_at(part_number, transferred_bytes, Instant::now())
    }

    fn should_abort_slow_at(&self, part_number: u32, transferred_bytes: u64, now: Instant) -> bool {
        // 基准不足，不判定
        let Some(average) = self.average_speed() else {
            return false;
        };

        let Some(started) = self.active.get(&part_number).map(|v| *v) else {
            return false;
        };

        // 宽限期内不判定，避免对启动爬坡期误判
        let elapsed = now.duration_since(started).as_secs_f64();
        if elapsed < self.policy.grace_secs as f64 {
            return false;
        }

        // 限制单分片的判定频率
        if let Some(last) = self.last_check.get(&part_number).map(|v| *v) {
            if now.duration_since(last).as_secs() < self.policy.check_interval_secs {
                return false;
            }
        }
        self.last_check.insert(part_number, now);

        let current_speed = transferred_bytes as f64 / elapsed;
        let threshold = average * self.policy.speed_ratio;
        let stalled = current_speed < threshold;

        if stalled {
            debug!(
                "检测到慢速分片: part={}, 当前 {:.2} KB/s < 阈值 {:.2} KB/s (平均 {:.2} KB/s)",
                part_number,
                current_speed / 1024.0,
                threshold / 1024.0,
                average / 1024.0
            );
        }

        stalled
    }
}
