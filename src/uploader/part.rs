// 上传分片管理
//
// 会话开始时一次性预切分所有分片：
// - 除最后一个分片外，所有分片大小固定为 partSize
// - 分片序号从 1 开始，连续无间隔
// - 分片总数不得超过上限，超出则在任何分片网络请求之前失败

use crate::api::CompletedPartInfo;
use anyhow::{Context, Result};
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// 等待上传
    Pending,
    /// 正在上传
    Uploading,
    /// 上传成功
    Succeeded,
    /// 上传失败
    Failed,
}

/// 上传分片信息
#[derive(Debug, Clone)]
pub struct PartTask {
    /// 分片序号（从1开始）
    pub part_number: u32,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
    /// 分片状态
    pub state: PartState,
    /// 完整性标签（仅成功时设置）
    pub e_tag: Option<String>,
    /// 累计尝试次数
    pub attempts: u32,
}

impl PartTask {
    pub fn new(part_number: u32, range: Range<u64>) -> Self {
        Self {
            part_number,
            range,
            state: PartState::Pending,
            e_tag: None,
            attempts: 0,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    ///
    /// # 返回
    /// 分片数据字节数组
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        let mut buffer = vec![0u8; self.size() as usize];
        file.read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.part_number,
            self.range.start,
            self.range.end,
            buffer.len()
        );

        Ok(buffer)
    }
}

/// 上传分片计划
///
/// 会话创建时固定，不再重新计算
#[derive(Debug)]
pub struct PartPlan {
    /// 所有分片（下标 = 分片序号 - 1）
    parts: Vec<PartTask>,
    /// 文件总大小
    total_size: u64,
    /// 分片大小
    part_size: u64,
}

impl PartPlan {
    /// 创建新的分片计划
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `part_size` - 分片大小（后端指定）
    /// * `max_parts` - 分片数量上限
    ///
    /// # 错误
    /// 分片数量超过上限时返回错误（调用方应提高分片大小）
    pub fn new(total_size: u64, part_size: u64, max_parts: u64) -> Result<Self> {
        anyhow::ensure!(part_size > 0, "分片大小必须大于 0");

        let part_count = total_size.div_ceil(part_size).max(1);
        if part_count > max_parts {
            anyhow::bail!(
                "分片数量超过上限: {} > {}，请增大分片大小",
                part_count,
                max_parts
            );
        }

        let parts = Self::calculate_parts(total_size, part_size);

        info!(
            "创建分片计划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            part_size,
            parts.len()
        );

        Ok(Self {
            parts,
            total_size,
            part_size,
        })
    }

    /// 计算分片
    ///
    /// 空文件保留一个空分片，保证会话可以被完成
    fn calculate_parts(total_size: u64, part_size: u64) -> Vec<PartTask> {
        if total_size == 0 {
            return vec![PartTask::new(1, 0..0)];
        }

        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1u32;

        while offset < total_size {
            let end = std::cmp::min(offset + part_size, total_size);
            parts.push(PartTask::new(part_number, offset..end));
            offset = end;
            part_number += 1;
        }

        parts
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 分片大小
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// 分片数量
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// 获取所有分片
    pub fn parts(&self) -> &[PartTask] {
        &self.parts
    }

    /// 按序号获取分片
    pub fn part(&self, part_number: u32) -> Option<&PartTask> {
        self.parts.get(part_number.checked_sub(1)? as usize)
    }

    /// 标记分片正在上传
    pub fn mark_uploading(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.state = PartState::Uploading;
            part.attempts += 1;
        }
    }

    /// 标记分片上传成功并记录 ETag
    pub fn mark_succeeded(&mut self, part_number: u32, e_tag: String) {
        if let Some(part) = self.part_mut(part_number) {
            part.state = PartState::Succeeded;
            part.e_tag = Some(e_tag);
        }
    }

    /// 标记分片上传失败
    pub fn mark_failed(&mut self, part_number: u32) {
        if let Some(part) = self.part_mut(part_number) {
            part.state = PartState::Failed;
            part.e_tag = None;
        }
    }

    /// 已成功分片数量
    pub fn succeeded_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| p.state == PartState::Succeeded)
            .count()
    }

    /// 是否全部成功
    pub fn is_completed(&self) -> bool {
        self.parts.iter().all(|p| p.state == PartState::Succeeded)
    }

    /// 仍处于失败状态的分片序号（升序）
    pub fn failed_part_numbers(&self) -> Vec<u32> {
        self.parts
            .iter()
            .filter(|p| p.state == PartState::Failed)
            .map(|p| p.part_number)
            .collect()
    }

    /// 收集所有分片的完整性标签（用于 complete 接口）
    ///
    /// # 返回
    /// 按分片序号升序排列的 {partNumber, eTag} 列表；
    /// 存在未成功分片时返回错误
    pub fn completed_parts(&self) -> Result<Vec<CompletedPartInfo>> {
        let mut completed = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match (&part.state, &part.e_tag) {
                (PartState::Succeeded, Some(e_tag)) => completed.push(CompletedPartInfo {
                    part_number: part.part_number,
                    e_tag: e_tag.clone(),
                }),
                _ => anyhow::bail!("分片 {} 尚未成功，无法完成会话", part.part_number),
            }
        }
        // 完成顺序不确定，提交前统一按序号升序排列
        completed.sort_by_key(|p| p.part_number);
        Ok(completed)
    }

    fn part_mut(&mut self, part_number: u32) -> Option<&mut PartTask> {
        self.parts.get_mut(part_number.checked_sub(1)? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_part_creation() {
        let part = PartTask::new(1, 0..1024);
        assert_eq!(part.part_number, 1);
        assert_eq!(part.size(), 1024);
        assert_eq!(part.state, PartState::Pending);
        assert!(part.e_tag.is_none());
    }

    #[test]
    fn test_plan_calculation() {
        // 整除
        let plan = PartPlan::new(150 * MB, 50 * MB, 10_000).unwrap();
        assert_eq!(plan.part_count(), 3);
        assert_eq!(plan.parts()[0].range, 0..(50 * MB));
        assert_eq!(plan.parts()[2].range, (100 * MB)..(150 * MB));

        // 末尾短分片: 120MB / 50MB = 50 + 50 + 20
        let plan = PartPlan::new(120 * MB, 50 * MB, 10_000).unwrap();
        assert_eq!(plan.part_count(), 3);
        assert_eq!(plan.parts()[2].range, (100 * MB)..(120 * MB));
        assert_eq!(plan.parts()[2].size(), 20 * MB);
    }

    #[test]
    fn test_part_count_ceiling() {
        // 10001 个分片应直接失败
        let err = PartPlan::new(10_001 * MB, MB, 10_000).unwrap_err();
        assert!(err.to_string().contains("分片数量超过上限"));

        // 恰好 10000 个分片允许
        let plan = PartPlan::new(10_000 * MB, MB, 10_000).unwrap();
        assert_eq!(plan.part_count(), 10_000);
    }

    #[test]
    fn test_empty_file_single_part() {
        let plan = PartPlan::new(0, 50 * MB, 10_000).unwrap();
        assert_eq!(plan.part_count(), 1);
        assert_eq!(plan.parts()[0].range, 0..0);
    }

    #[test]
    fn test_state_transitions_and_etag_invariant() {
        let mut plan = PartPlan::new(100 * MB, 50 * MB, 10_000).unwrap();

        plan.mark_uploading(1);
        assert_eq!(plan.part(1).unwrap().state, PartState::Uploading);
        assert_eq!(plan.part(1).unwrap().attempts, 1);

        plan.mark_succeeded(1, "etag-1".to_string());
        assert_eq!(plan.part(1).unwrap().state, PartState::Succeeded);

        // 失败分片不保留 ETag
        plan.mark_succeeded(2, "etag-2".to_string());
        plan.mark_failed(2);
        assert!(plan.part(2).unwrap().e_tag.is_none());
        assert_eq!(plan.failed_part_numbers(), vec![2]);
        assert!(!plan.is_completed());
    }

    #[test]
    fn test_completed_parts_sorted_ascending() {
        let mut plan = PartPlan::new(150 * MB, 50 * MB, 10_000).unwrap();

        // 完成顺序乱序：3, 1, 2
        plan.mark_succeeded(3, "etag-3".to_string());
        plan.mark_succeeded(1, "etag-1".to_string());
        plan.mark_succeeded(2, "etag-2".to_string());

        let parts = plan.completed_parts().unwrap();
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[2].e_tag, "etag-3");
    }

    #[test]
    fn test_completed_parts_rejects_incomplete_plan() {
        let mut plan = PartPlan::new(100 * MB, 50 * MB, 10_000).unwrap();
        plan.mark_succeeded(1, "etag-1".to_string());

        assert!(plan.completed_parts().is_err());
    }

    #[tokio::test]
    async fn test_read_data_range() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 100]).unwrap();
        file.write_all(&[2u8; 100]).unwrap();
        file.flush().unwrap();

        let part = PartTask::new(2, 100..200);
        let data = part.read_data(file.path()).await.unwrap();

        assert_eq!(data.len(), 100);
        assert!(data.iter().all(|&b| b == 2));
    }

    proptest! {
        /// 任意文件大小与分片大小下，分片序号为 1..=ceil(size/part_size)
        /// 且字节范围连续、无间隔、完整覆盖文件
        #[test]
        fn prop_parts_cover_file(total_size in 1u64..1_000_000, part_size in 1u64..100_000) {
            let expected = total_size.div_ceil(part_size);
            prop_assume!(expected <= 10_000);

            let plan = PartPlan::new(total_size, part_size, 10_000).unwrap();
            prop_assert_eq!(plan.part_count() as u64, expected);

            let mut offset = 0u64;
            for (i, part) in plan.parts().iter().enumerate() {
                prop_assert_eq!(part.part_number as usize, i + 1);
                prop_assert_eq!(part.range.start, offset);
                prop_assert!(part.size() <= part_size);
                offset = part.range.end;
            }
            prop_assert_eq!(offset, total_size);
        }
    }
}
