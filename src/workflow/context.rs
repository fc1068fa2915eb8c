//! 阶段执行上下文
//!
//! 封装"我正在处理哪个 PO 的第几轮第几次尝试"这一信息

use std::fmt::Display;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::models::SubmissionRequest;
use crate::services::Selection;
use crate::workflow::stage::Stage;
use crate::workflow::steps::StepOk;

/// 跨阶段的运行状态，只由引擎修改
#[derive(Debug, Default)]
pub struct RunState {
    /// 上传已完成（跨轮保留，用于智能重启）
    pub upload_done: bool,
    /// 当前会话中已勾选的订单（每轮清空）
    pub selection: Option<Selection>,
    pub document: Option<PathBuf>,
}

impl RunState {
    /// 记录一个阶段的成功结果
    pub fn apply(&mut self, stage: Stage, ok: &mut StepOk) {
        if stage.is_irreversible() {
            self.upload_done = true;
        }
        if let Some(selection) = ok.selection.take() {
            self.selection = Some(selection);
        }
        if let Some(document) = ok.document.take() {
            self.document = Some(document);
        }
    }

    /// 新会话开始时调用
    pub fn begin_round(&mut self) {
        self.selection = None;
    }
}

/// 阶段上下文
///
/// 每次尝试构造一次，阶段只读。
#[derive(Debug, Clone, Copy)]
pub struct StageCtx<'a> {
    pub request: &'a SubmissionRequest,
    pub state: &'a RunState,
    /// 本阶段第几次尝试（从 1 开始）
    pub attempt: u32,
    /// 第几轮
    pub round: u32,
}

impl<'a> StageCtx<'a> {
    pub fn config(&self) -> &'a EngineConfig {
        &self.request.config
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

impl Display for StageCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [轮 {} 次 {}]", self.request, self.round, self.attempt)
    }
}
