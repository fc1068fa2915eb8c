//! 阶段定义与阶段图

use std::fmt;

use serde::Serialize;

use crate::error::FailureKind;

/// 提交流程中的一个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    Login,
    LocateUploadControl,
    UploadFile,
    ViewOrders,
    OrderConfirmationFallback,
    SelectOrders,
    DownloadDocument,
    Print,
}

/// 阶段耗尽重试后的升级方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// 重启整个流程（新会话）
    Restart,
    /// 在同一会话中转到替代阶段
    Fallback(Stage),
    /// 结束流程，不再重启
    Terminate,
    /// 记录失败后继续
    Tolerate,
}

/// 阶段失败后的下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 继续执行路线上的下一个阶段
    Continue,
    Fallback(Stage),
    Restart,
    Terminate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Login => "Login",
            Stage::LocateUploadControl => "LocateUploadControl",
            Stage::UploadFile => "UploadFile",
            Stage::ViewOrders => "ViewOrders",
            Stage::OrderConfirmationFallback => "OrderConfirmationFallback",
            Stage::SelectOrders => "SelectOrders",
            Stage::DownloadDocument => "DownloadDocument",
            Stage::Print => "Print",
        }
    }

    /// 替代后继阶段，只有 ViewOrders 有
    pub fn fallback(self) -> Option<Stage> {
        match self {
            Stage::ViewOrders => Some(Stage::OrderConfirmationFallback),
            _ => None,
        }
    }

    pub fn escalation(self) -> Escalation {
        if let Some(alternate) = self.fallback() {
            return Escalation::Fallback(alternate);
        }
        match self {
            // 列表上始终找不到本次的订单，重新上传只会制造重复行
            Stage::SelectOrders => Escalation::Terminate,
            Stage::Print => Escalation::Tolerate,
            _ => Escalation::Restart,
        }
    }

    /// 在阶段重试耗尽（或遇到致命错误）后决定下一步
    pub fn on_failure(self, kind: FailureKind) -> Transition {
        match (kind, self.escalation()) {
            (_, Escalation::Tolerate) => Transition::Continue,
            (FailureKind::Fatal, _) => Transition::Terminate,
            (_, Escalation::Fallback(alternate)) => Transition::Fallback(alternate),
            (FailureKind::Transient, Escalation::Restart) => Transition::Restart,
            _ => Transition::Terminate,
        }
    }

    /// 成功后服务器端状态不可撤销的阶段
    pub fn is_irreversible(self) -> bool {
        matches!(self, Stage::UploadFile)
    }

    /// 执行前后需要检查门户页内错误提示的阶段
    ///
    /// UploadFile 不在其中：上传成功后误判为错误会导致重复上传。
    pub fn checks_portal_errors(self) -> bool {
        matches!(
            self,
            Stage::ViewOrders
                | Stage::OrderConfirmationFallback
                | Stage::SelectOrders
                | Stage::DownloadDocument
        )
    }

    /// 页面刷新后需要重新勾选订单的阶段
    pub fn depends_on_selection(self) -> bool {
        matches!(self, Stage::DownloadDocument)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本轮要执行的阶段路线
///
/// 上传已完成时（智能重启）跳过上传相关阶段，登录后直接进入订单确认页。
/// 替代阶段不在路线中，只通过 [`Stage::fallback`] 到达。
pub fn route(upload_done: bool, include_print: bool) -> Vec<Stage> {
    let mut stages = if upload_done {
        vec![
            Stage::Login,
            Stage::OrderConfirmationFallback,
            Stage::SelectOrders,
            Stage::DownloadDocument,
        ]
    } else {
        vec![
            Stage::Login,
            Stage::LocateUploadControl,
            Stage::UploadFile,
            Stage::ViewOrders,
            Stage::SelectOrders,
            Stage::DownloadDocument,
        ]
    };
    if include_print {
        stages.push(Stage::Print);
    }
    stages
}
