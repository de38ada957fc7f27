// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    ///
    /// 文件不存在时返回默认配置
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .context("读取配置文件失败")?;
        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        Ok(config)
    }

    /// 保存配置到 TOML 文件
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context("创建配置目录失败")?;
        }

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content).await.context("写入配置文件失败")?;
        Ok(())
    }
}

/// 上传配置
///
/// 慢速检测阈值（比例/宽限期/复查间隔）为经验值，
/// 全部暴露为配置项而非硬编码
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 最大并发分片数
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,
    /// 默认分片大小（字节），后端未指定时使用
    #[serde(default = "default_part_size")]
    pub default_part_size: u64,
    /// 分片数量上限，超出则在发起任何分片请求前直接失败
    #[serde(default = "default_max_total_parts")]
    pub max_total_parts: u64,
    /// 单次分片传输硬超时（秒）
    #[serde(default = "default_part_timeout_secs")]
    pub part_timeout_secs: u64,
    /// 单次协调器调用内的最大尝试次数
    #[serde(default = "default_max_attempts_per_round")]
    pub max_attempts_per_round: u32,
    /// 初始尝试之后的额外重试轮数（最后一轮为终轮）
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// 慢速中止后的最小退避延迟（毫秒）
    #[serde(default = "default_stall_min_backoff_ms")]
    pub stall_min_backoff_ms: u64,
    /// 慢速判定比例：当前速度低于平均速度的该比例时视为停滞
    #[serde(default = "default_stall_speed_ratio")]
    pub stall_speed_ratio: f64,
    /// 慢速判定宽限期（秒），分片开始传输后至少等待该时长
    #[serde(default = "default_stall_grace_secs")]
    pub stall_grace_secs: u64,
    /// 慢速判定复查间隔（秒），单分片两次判定之间的最小间隔
    #[serde(default = "default_stall_check_interval_secs")]
    pub stall_check_interval_secs: u64,
    /// 慢速判定所需的最少已完成分片样本数
    #[serde(default = "default_stall_min_samples")]
    pub stall_min_samples: usize,
}

fn default_max_concurrent_parts() -> usize {
    4
}

fn default_part_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_max_total_parts() -> u64 {
    10_000
}

fn default_part_timeout_secs() -> u64 {
    180 // 3分钟
}

fn default_max_attempts_per_round() -> u32 {
    3
}

fn default_retry_rounds() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_stall_min_backoff_ms() -> u64 {
    5000
}

fn default_stall_speed_ratio() -> f64 {
    0.3
}

fn default_stall_grace_secs() -> u64 {
    20
}

fn default_stall_check_interval_secs() -> u64 {
    15
}

fn default_stall_min_samples() -> usize {
    2
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_parts: default_max_concurrent_parts(),
            default_part_size: default_part_size(),
            max_total_parts: default_max_total_parts(),
            part_timeout_secs: default_part_timeout_secs(),
            max_attempts_per_round: default_max_attempts_per_round(),
            retry_rounds: default_retry_rounds(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            stall_min_backoff_ms: default_stall_min_backoff_ms(),
            stall_speed_ratio: default_stall_speed_ratio(),
            stall_grace_secs: default_stall_grace_secs(),
            stall_check_interval_secs: default_stall_check_interval_secs(),
            stall_min_samples: default_stall_min_samples(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();

        assert_eq!(config.max_concurrent_parts, 4);
        assert_eq!(config.default_part_size, 50 * 1024 * 1024);
        assert_eq!(config.max_total_parts, 10_000);
        assert_eq!(config.part_timeout_secs, 180);
        assert_eq!(config.max_attempts_per_round, 3);
        assert_eq!(config.retry_rounds, 3);
        assert_eq!(config.initial_backoff_ms, 1000);
        assert_eq!(config.stall_min_backoff_ms, 5000);
        assert_eq!(config.stall_speed_ratio, 0.3);
        assert_eq!(config.stall_grace_secs, 20);
        assert_eq!(config.stall_check_interval_secs, 15);
        assert_eq!(config.stall_min_samples, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        // 只配置并发数，其余字段应回退到默认值
        let toml_str = r#"
            [upload]
            max_concurrent_parts = 8

            [log]
            level = "debug"
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.upload.max_concurrent_parts, 8);
        assert_eq!(config.upload.default_part_size, 50 * 1024 * 1024);
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.enabled);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_default() {
        let config = AppConfig::load(Path::new("/nonexistent/app.toml"))
            .await
            .unwrap();
        assert_eq!(config.upload.max_concurrent_parts, 4);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/app.toml");

        let mut config = AppConfig::default();
        config.upload.max_concurrent_parts = 2;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.upload.max_concurrent_parts, 2);
    }
}
