//! 阶段结果与提交结果
//!
//! `SubmissionResult` 是引擎唯一的输出，调用方据此决定打印、归档还是通知人工处理。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::models::{ListingEntry, ServiceLevel};
use crate::workflow::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    Success,
    Failed,
    Cancelled,
}

/// 一个阶段在一轮中的执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    /// 本阶段实际尝试次数
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub detail: Option<String>,
    /// 第几轮（从 1 开始，重启后递增）
    pub round: u32,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Success
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.status {
            StageStatus::Success => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Cancelled => "⊘",
        };
        write!(
            f,
            "{} 第{}轮 {} (尝试 {} 次, {:.1}s)",
            mark,
            self.round,
            self.stage,
            self.attempts,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, " 错误: {}", error)?;
        } else if let Some(detail) = &self.detail {
            write!(f, " {}", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionStatus {
    /// 已下载确认文档
    Success,
    /// 已上传，但没有拿到确认文档
    PartialSuccess,
    Failed,
    /// 调用方取消（不是错误）
    Cancelled,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SubmissionStatus::Success => "Success",
            SubmissionStatus::PartialSuccess => "PartialSuccess",
            SubmissionStatus::Failed => "Failed",
            SubmissionStatus::Cancelled => "Cancelled",
        };
        f.write_str(text)
    }
}

/// 调用方对结果的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 已完成，归档任务
    Completed,
    /// 已上传但需要人工下载/打印；归档任务，绝不重新上传
    ManualPrint,
    /// 失败，保留任务并通知人工排查
    ManualIntervention,
    /// 上传前被取消，保留任务等待下次运行
    Requeue,
}

/// 一次提交的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub reference: String,
    pub status: SubmissionStatus,
    pub trace: Vec<StageOutcome>,
    /// 下载的确认文档；status 为 Success 时一定存在
    pub document: Option<PathBuf>,
    /// 诊断截图，以及因门户错误提示被改判失败的尝试所下载的文件
    pub artifacts: Vec<PathBuf>,
    /// 最后一次失败的原因
    pub message: Option<String>,
    pub upload_done: bool,
    pub selected: Vec<ListingEntry>,
    pub missing_levels: Vec<ServiceLevel>,
    /// 实际执行的轮数
    pub rounds: u32,
    pub elapsed: Duration,
}

impl SubmissionResult {
    pub fn is_success(&self) -> bool {
        self.status == SubmissionStatus::Success
    }

    pub fn disposition(&self) -> Disposition {
        match self.status {
            SubmissionStatus::Success => Disposition::Completed,
            SubmissionStatus::PartialSuccess => Disposition::ManualPrint,
            SubmissionStatus::Failed => Disposition::ManualIntervention,
            SubmissionStatus::Cancelled if self.upload_done => Disposition::ManualPrint,
            SubmissionStatus::Cancelled => Disposition::Requeue,
        }
    }

    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self.disposition(),
            Disposition::ManualPrint | Disposition::ManualIntervention
        ) || self.print_failed()
    }

    /// 文档已下载但打印阶段失败
    pub fn print_failed(&self) -> bool {
        self.outcomes_of(Stage::Print).any(|o| !o.succeeded())
    }

    pub fn outcomes_of(&self, stage: Stage) -> impl Iterator<Item = &StageOutcome> {
        self.trace.iter().filter(move |o| o.stage == stage)
    }

    /// 多行执行轨迹，用于日志和人工处理记录
    pub fn trace_summary(&self) -> String {
        self.trace
            .iter()
            .map(|o| format!("  {}", o))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
