//! 阶段引擎 - 流程层
//!
//! 核心职责：按阶段路线驱动一个门户会话，执行两级重试：
//! 1. 阶段内重试：同一会话，间隔稳定等待后重做本阶段
//! 2. 整体重试：阶段耗尽重试后关闭会话，从登录重新开始；上传已完成时跳过上传（智能重启）
//!
//! 引擎从不返回错误，所有失败都折叠进 [`SubmissionResult`] 的阶段轨迹。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{FailureKind, StageFailure};
use crate::infrastructure::{PortalSession, SessionFactory};
use crate::models::SubmissionRequest;
use crate::workflow::context::{RunState, StageCtx};
use crate::workflow::outcome::{
    StageOutcome, StageStatus, SubmissionResult, SubmissionStatus,
};
use crate::workflow::stage::{self, Stage, Transition};
use crate::workflow::steps::{StageStep, StepResult};
use crate::workflow::waits;

/// 一轮结束的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Completed,
    Restart,
    Terminated,
    Cancelled,
}

/// 一个阶段（含阶段内重试）的执行结果
struct StageRun {
    outcome: StageOutcome,
    result: StepResult,
    cancelled: bool,
}

/// 引擎运行期间累积的报告数据
#[derive(Default)]
struct Report {
    trace: Vec<StageOutcome>,
    artifacts: Vec<PathBuf>,
    message: Option<String>,
}

/// 阶段引擎
///
/// - 不持有会话：每轮通过 [`SessionFactory`] 打开，本轮结束时关闭
/// - 不认识页面细节：阶段行为由 [`StageStep`] 提供
/// - 配置只来自 [`SubmissionRequest`] 中的 [`EngineConfig`]
pub struct StageEngine {
    factory: Arc<dyn SessionFactory>,
    steps: HashMap<Stage, Arc<dyn StageStep>>,
    cancel: CancellationToken,
}

impl StageEngine {
    pub fn new(factory: Arc<dyn SessionFactory>, steps: Vec<Arc<dyn StageStep>>) -> Self {
        let steps = steps.into_iter().map(|s| (s.stage(), s)).collect();
        Self {
            factory,
            steps,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部的取消令牌（例如 Ctrl-C 处理器持有的令牌）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn includes_print(&self) -> bool {
        self.steps.contains_key(&Stage::Print)
    }

    /// 执行一次提交
    pub async fn run(&self, request: &SubmissionRequest) -> SubmissionResult {
        let started = Instant::now();
        let config = &request.config;
        let max_rounds = config.overall_retries() + 1;

        let mut state = RunState::default();
        let mut report = Report::default();
        let mut round = 0;

        info!("{} 🚀 开始提交 {}", request, request.file_name());

        let end = loop {
            round += 1;
            if self.cancel.is_cancelled() {
                info!("{} ⊘ 收到取消请求，第 {} 轮不再开始", request, round);
                report.trace.push(skipped(Stage::Login, round));
                break RoundEnd::Cancelled;
            }

            let route = stage::route(state.upload_done, self.includes_print());
            if round > 1 {
                if state.upload_done {
                    info!("{} 🔄 第 {}/{} 轮: 上传已完成，跳过上传直接进入订单确认", request, round, max_rounds);
                } else {
                    info!("{} 🔄 第 {}/{} 轮: 从登录重新开始", request, round, max_rounds);
                }
            }

            state.begin_round();
            match self.run_round(request, &mut state, &mut report, round, &route).await {
                RoundEnd::Restart if round < max_rounds => {
                    if self.wait_before_restart(config.restart_delay()).await {
                        info!("{} ⊘ 等待重启时收到取消请求", request);
                        report.trace.push(skipped(Stage::Login, round + 1));
                        break RoundEnd::Cancelled;
                    }
                }
                RoundEnd::Restart => {
                    warn!("{} ⚠️ 已用完 {} 次整体重试", request, config.overall_retries());
                    break RoundEnd::Terminated;
                }
                other => break other,
            }
        };

        // 路线走完前的取消一定跳过了后续阶段（例如打印），即使文档已下载
        let status = match end {
            RoundEnd::Cancelled => SubmissionStatus::Cancelled,
            _ if state.document.is_some() => SubmissionStatus::Success,
            _ if state.upload_done => SubmissionStatus::PartialSuccess,
            _ => SubmissionStatus::Failed,
        };

        let (selected, missing_levels) = state
            .selection
            .take()
            .map(|s| (s.chosen, s.missing_levels))
            .unwrap_or_default();

        let result = SubmissionResult {
            reference: request.reference.clone(),
            status,
            trace: report.trace,
            document: state.document,
            artifacts: report.artifacts,
            message: report.message,
            upload_done: state.upload_done,
            selected,
            missing_levels,
            rounds: round,
            elapsed: started.elapsed(),
        };

        match result.status {
            SubmissionStatus::Success => info!("{} ✅ 提交完成 ({} 轮)", request, result.rounds),
            SubmissionStatus::PartialSuccess => {
                warn!("{} ⚠️ 已上传但未取得确认文档，需要人工打印", request)
            }
            SubmissionStatus::Failed => error!(
                "{} ❌ 提交失败: {}",
                request,
                result.message.as_deref().unwrap_or("未知原因")
            ),
            SubmissionStatus::Cancelled => warn!("{} ⊘ 提交已取消", request),
        }
        result
    }

    /// 重启前等待；期间收到取消返回 true
    async fn wait_before_restart(&self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = sleep(delay) => self.cancel.is_cancelled(),
            _ = self.cancel.cancelled() => true,
        }
    }

    async fn run_round(
        &self,
        request: &SubmissionRequest,
        state: &mut RunState,
        report: &mut Report,
        round: u32,
        route: &[Stage],
    ) -> RoundEnd {
        let config = &request.config;
        let started = Instant::now();

        let opened = timeout(config.attempt_ceiling(), self.factory.open_session()).await;
        let failure = match opened {
            Ok(Ok(mut session)) => {
                let end = self
                    .drive(session.as_mut(), request, state, report, round, route)
                    .await;
                if timeout(config.stage_timeout(), session.close()).await.is_err() {
                    warn!("{} ⚠️ 关闭会话超时", request);
                }
                return end;
            }
            Ok(Err(e)) => StageFailure::from(e),
            Err(_) => StageFailure::transient("打开浏览器会话超时"),
        };

        error!("{} ❌ 无法打开会话: {}", request, failure);
        report.trace.push(StageOutcome {
            stage: Stage::Login,
            status: StageStatus::Failed,
            attempts: 1,
            elapsed: started.elapsed(),
            error: Some(failure.message.clone()),
            detail: None,
            round,
        });
        let end = if failure.kind == FailureKind::Transient {
            RoundEnd::Restart
        } else {
            RoundEnd::Terminated
        };
        report.message = Some(failure.message);
        end
    }

    /// 在一个会话中按路线执行阶段
    async fn drive(
        &self,
        session: &mut dyn PortalSession,
        request: &SubmissionRequest,
        state: &mut RunState,
        report: &mut Report,
        round: u32,
        route: &[Stage],
    ) -> RoundEnd {
        for &planned in route {
            let mut stage = planned;
            loop {
                if self.cancel.is_cancelled() {
                    info!("{} ⊘ 收到取消请求，{} 不再执行", request, stage);
                    report.trace.push(skipped(stage, round));
                    return RoundEnd::Cancelled;
                }

                let run = self
                    .run_stage(session, stage, request, state, report, round)
                    .await;
                report.trace.push(run.outcome);
                if run.cancelled {
                    return RoundEnd::Cancelled;
                }

                let failure = match run.result {
                    Ok(mut ok) => {
                        state.apply(stage, &mut ok);
                        break;
                    }
                    Err(failure) => failure,
                };

                match stage.on_failure(failure.kind) {
                    Transition::Continue => {
                        warn!("{} ⚠️ {} 失败，不影响提交结果: {}", request, stage, failure);
                        break;
                    }
                    Transition::Fallback(alternate) => {
                        warn!("{} ↪ {} 失败，改走 {}", request, stage, alternate);
                        stage = alternate;
                    }
                    Transition::Restart => {
                        warn!("{} ⚠️ {} 重试耗尽，准备整体重试", request, stage);
                        report.message = Some(format!("{}: {}", stage, failure));
                        return RoundEnd::Restart;
                    }
                    Transition::Terminate => {
                        error!("{} ❌ {} 失败，终止流程: {}", request, stage, failure);
                        report.message = Some(format!("{}: {}", stage, failure));
                        return RoundEnd::Terminated;
                    }
                }
            }
        }
        RoundEnd::Completed
    }

    /// 执行一个阶段，包含阶段内重试、页内错误检测、截图和恢复
    async fn run_stage(
        &self,
        session: &mut dyn PortalSession,
        stage: Stage,
        request: &SubmissionRequest,
        state: &mut RunState,
        report: &mut Report,
        round: u32,
    ) -> StageRun {
        let config = &request.config;
        let started = Instant::now();
        let max_attempts = config.stage_attempts();

        let Some(step) = self.steps.get(&stage).cloned() else {
            let failure = StageFailure::fatal(format!("未配置阶段 {}", stage));
            return finish(stage, round, 0, started, Err(failure), false);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("{} ▶ {} (第 {}/{} 次)", request, stage, attempt, max_attempts);

            let result = {
                let ctx = StageCtx {
                    request,
                    state: &*state,
                    attempt,
                    round,
                };
                attempt_step(step.as_ref(), session, &ctx, config).await
            };
            let downloaded = result.as_ref().ok().and_then(|ok| ok.document.clone());
            let result = self.detect_portal_error(session, stage, result, config).await;
            if let (Some(document), Err(_)) = (downloaded, &result) {
                warn!(
                    "{} ⚠️ {} 出现错误提示，已下载的文件保留为诊断文件: {}",
                    request,
                    stage,
                    document.display()
                );
                report.artifacts.push(document);
            }

            let failure = match result {
                Ok(ok) => {
                    if let Some(detail) = &ok.detail {
                        info!("{} ✓ {}: {}", request, stage, detail);
                    }
                    return finish(stage, round, attempt, started, Ok(ok), false);
                }
                Err(failure) => failure,
            };

            warn!(
                "{} ✗ {} 第 {}/{} 次失败: {}",
                request, stage, attempt, max_attempts, failure
            );
            self.capture(session, stage, round, attempt, config, report).await;

            let cancelled = self.cancel.is_cancelled();
            if cancelled || failure.kind == FailureKind::Fatal || attempt >= max_attempts {
                return finish(stage, round, attempt, started, Err(failure), cancelled);
            }

            if !config.settle_delay().is_zero() {
                sleep(config.settle_delay()).await;
            }
            if failure.portal_error {
                self.recover(session, stage, request, state, round).await;
            }
        }
    }

    /// 门户页内错误提示会把成功的尝试也改判为失败
    async fn detect_portal_error(
        &self,
        session: &mut dyn PortalSession,
        stage: Stage,
        result: StepResult,
        config: &EngineConfig,
    ) -> StepResult {
        if !stage.checks_portal_errors() {
            return result;
        }
        if matches!(&result, Err(f) if f.kind == FailureKind::Fatal) {
            return result;
        }
        match timeout(config.stage_timeout(), session.error_indicator()).await {
            Ok(Ok(Some(text))) => Err(StageFailure::portal(format!("门户错误提示: {}", text))),
            Ok(Err(e)) => {
                debug!("检查错误提示失败: {}", e);
                result
            }
            _ => result,
        }
    }

    /// 恢复流程：关闭提示 → 刷新页面 → 等待稳定 → 重新勾选订单
    async fn recover(
        &self,
        session: &mut dyn PortalSession,
        stage: Stage,
        request: &SubmissionRequest,
        state: &mut RunState,
        round: u32,
    ) {
        let config = &request.config;
        info!("{} 🔧 {} 恢复: 关闭错误提示并刷新页面", request, stage);

        match timeout(config.stage_timeout(), session.dismiss_error_indicator()).await {
            Ok(Ok(true)) => debug!("已关闭错误提示"),
            Ok(Ok(false)) => debug!("未找到关闭按钮，已发送 Escape"),
            Ok(Err(e)) => warn!("{} ⚠️ 关闭错误提示失败: {}", request, e),
            Err(_) => warn!("{} ⚠️ 关闭错误提示超时", request),
        }
        match timeout(config.stage_timeout(), session.reload()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} ⚠️ 刷新页面失败: {}", request, e),
            Err(_) => warn!("{} ⚠️ 刷新页面超时", request),
        }
        waits::settle_network(session, config.idle_sub_timeout(), config.poll_interval()).await;

        if !stage.depends_on_selection() || state.selection.is_none() {
            return;
        }
        let Some(select) = self.steps.get(&Stage::SelectOrders).cloned() else {
            return;
        };

        let result = {
            let ctx = StageCtx {
                request,
                state: &*state,
                attempt: 1,
                round,
            };
            attempt_step(select.as_ref(), session, &ctx, config).await
        };
        match result {
            Ok(mut ok) => {
                info!("{} ✓ 已重新勾选订单", request);
                state.apply(Stage::SelectOrders, &mut ok);
            }
            Err(failure) => warn!("{} ⚠️ 重新勾选订单失败: {}", request, failure),
        }
    }

    /// 失败截图，任何错误都只记日志
    async fn capture(
        &self,
        session: &mut dyn PortalSession,
        stage: Stage,
        round: u32,
        attempt: u32,
        config: &EngineConfig,
        report: &mut Report,
    ) {
        let path = config.diagnostics_dir().join(format!(
            "{}_{}_r{}_a{}.png",
            Local::now().format("%Y%m%d_%H%M%S_%3f"),
            stage,
            round,
            attempt
        ));
        match timeout(config.stage_timeout(), session.screenshot(&path)).await {
            Ok(Ok(saved)) => {
                debug!("已保存诊断截图: {}", saved.display());
                report.artifacts.push(saved);
            }
            Ok(Err(e)) => debug!("保存诊断截图失败: {}", e),
            Err(_) => debug!("保存诊断截图超时"),
        }
    }
}

/// 单次尝试，受硬上限约束
async fn attempt_step(
    step: &dyn StageStep,
    session: &mut dyn PortalSession,
    ctx: &StageCtx<'_>,
    config: &EngineConfig,
) -> StepResult {
    let ceiling = config.attempt_ceiling();
    match timeout(ceiling, step.attempt(session, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(StageFailure::transient(format!(
            "{} 超时 ({}ms)",
            step.stage(),
            ceiling.as_millis()
        ))),
    }
}

/// 因取消而没有开始的阶段
fn skipped(stage: Stage, round: u32) -> StageOutcome {
    StageOutcome {
        stage,
        status: StageStatus::Cancelled,
        attempts: 0,
        elapsed: Duration::ZERO,
        error: Some("已取消".to_string()),
        detail: None,
        round,
    }
}

fn finish(
    stage: Stage,
    round: u32,
    attempts: u32,
    started: Instant,
    result: StepResult,
    cancelled: bool,
) -> StageRun {
    let (status, error, detail) = match &result {
        Ok(ok) => (StageStatus::Success, None, ok.detail.clone()),
        Err(f) if cancelled => (StageStatus::Cancelled, Some(f.message.clone()), None),
        Err(f) => (StageStatus::Failed, Some(f.message.clone()), None),
    };
    StageRun {
        outcome: StageOutcome {
            stage,
            status,
            attempts,
            elapsed: started.elapsed(),
            error,
            detail,
            round,
        },
        result,
        cancelled,
    }
}
