//! 人工处理记录服务 - 业务能力层
//!
//! 只负责"追加写 manual_action.txt"能力，不关心流程

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::workflow::{SubmissionResult, SubmissionStatus};

/// 人工处理记录服务
///
/// 职责：
/// - 将需要人工介入的提交追加写入记录文件
/// - 只处理单个提交结果
/// - 不决定哪些结果需要记录
pub struct ManualActionWriter {
    path: PathBuf,
}

impl ManualActionWriter {
    pub fn new() -> Self {
        Self::with_path("manual_action.txt")
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入一条记录
    ///
    /// 记录包含清单文件、结论、最后的错误、阶段轨迹和诊断截图路径，
    /// 操作员不需要重新运行就能定位问题。
    pub async fn write(&self, manifest: &Path, result: &SubmissionResult) -> Result<()> {
        debug!(
            "写入人工处理记录: PO {} | 状态 {} | 轨迹 {} 条",
            result.reference,
            result.status,
            result.trace.len()
        );

        let action = match result.status {
            SubmissionStatus::PartialSuccess => "已上传，请在门户手动下载并打印确认单",
            SubmissionStatus::Cancelled if result.document.is_some() => {
                "确认单已下载但运行被取消，请手动打印"
            }
            SubmissionStatus::Cancelled => "已上传但运行被取消，请在门户手动下载并打印确认单",
            SubmissionStatus::Success => "确认单已下载但打印失败，请手动打印",
            SubmissionStatus::Failed => "提交失败，请根据轨迹和截图排查后重新提交",
        };

        let mut entry = format!(
            "[{}] PO {} | {} | {}\n  清单: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            result.reference,
            result.status,
            action,
            manifest.display()
        );
        if let Some(document) = &result.document {
            entry.push_str(&format!("  文档: {}\n", document.display()));
        }
        if let Some(message) = &result.message {
            entry.push_str(&format!("  原因: {}\n", message));
        }
        if !result.trace.is_empty() {
            entry.push_str(&result.trace_summary());
            entry.push('\n');
        }
        for artifact in &result.artifacts {
            entry.push_str(&format!("  诊断文件: {}\n", artifact.display()));
        }
        entry.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("无法打开人工处理记录: {}", self.path.display()))?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

impl Default for ManualActionWriter {
    fn default() -> Self {
        Self::new()
    }
}
