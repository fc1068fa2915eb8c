//! 阶段实现
//!
//! 引擎只认识 [`StageStep`]：每个阶段一次 `attempt`，重试、超时、截图和恢复都由引擎负责。
//! [`PortalSteps`] 是针对真实门户的实现，所有页面细节来自 [`PortalProfile`]。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::{SessionError, StageFailure};
use crate::infrastructure::{PortalSession, WaitCondition};
use crate::models::{PortalProfile, Selector};
use crate::services::{DocumentPrinter, OrderSelector, Selection, SelectionError};
use crate::workflow::context::StageCtx;
use crate::workflow::stage::Stage;
use crate::workflow::waits::{self, WaitStrategy};

/// 阶段成功时带回的数据，由引擎写入运行状态
#[derive(Debug, Default)]
pub struct StepOk {
    pub detail: Option<String>,
    pub selection: Option<Selection>,
    pub document: Option<PathBuf>,
}

impl StepOk {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_document(mut self, document: impl Into<PathBuf>) -> Self {
        self.document = Some(document.into());
        self
    }
}

pub type StepResult = Result<StepOk, StageFailure>;

/// 单个阶段的行为
#[async_trait]
pub trait StageStep: Send + Sync {
    fn stage(&self) -> Stage;

    async fn attempt(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult;
}

async fn click(
    session: &mut dyn PortalSession,
    candidates: &[Selector],
    what: &str,
) -> Result<(), StageFailure> {
    if session.find_and_click(candidates).await? {
        debug!("已点击: {}", what);
        Ok(())
    } else {
        Err(SessionError::not_found(what).into())
    }
}

fn file_safe(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// 门户阶段集合
pub struct PortalSteps {
    profile: Arc<PortalProfile>,
    credentials: Credentials,
    selector: OrderSelector,
    prefer_today: bool,
    printer: Option<Arc<dyn DocumentPrinter>>,
}

impl PortalSteps {
    pub fn new(profile: Arc<PortalProfile>, credentials: Credentials, selector: OrderSelector) -> Self {
        Self {
            profile,
            credentials,
            selector,
            prefer_today: true,
            printer: None,
        }
    }

    /// 挂接打印机后流程末尾会增加 Print 阶段
    pub fn with_printer(mut self, printer: Arc<dyn DocumentPrinter>) -> Self {
        self.printer = Some(printer);
        self
    }

    /// 是否优先选择今天创建的订单
    pub fn prefer_today(mut self, prefer: bool) -> Self {
        self.prefer_today = prefer;
        self
    }

    /// 拆分成引擎使用的阶段列表
    pub fn into_steps(self) -> Vec<Arc<dyn StageStep>> {
        let mut stages = vec![
            Stage::Login,
            Stage::LocateUploadControl,
            Stage::UploadFile,
            Stage::ViewOrders,
            Stage::OrderConfirmationFallback,
            Stage::SelectOrders,
            Stage::DownloadDocument,
        ];
        if self.printer.is_some() {
            stages.push(Stage::Print);
        }

        let portal = Arc::new(self);
        stages
            .into_iter()
            .map(|stage| {
                Arc::new(PortalStep {
                    stage,
                    portal: Arc::clone(&portal),
                }) as Arc<dyn StageStep>
            })
            .collect()
    }

    async fn check_rejected(&self, session: &mut dyn PortalSession) -> Result<(), StageFailure> {
        let rejected = WaitCondition::TextPresent(self.profile.login_rejected_keywords.clone());
        if session.probe(&rejected).await? {
            return Err(StageFailure::fatal("门户拒绝登录，请检查账号密码"));
        }
        Ok(())
    }

    async fn login(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        let config = ctx.config();
        let p = &self.profile;

        if ctx.is_retry() {
            session.navigate(&p.login_url).await?;
        }

        let email_field = WaitCondition::AnyVisible(p.email_fields.clone());
        if !session
            .wait_for_condition(&email_field, config.stage_timeout(), config.poll_interval())
            .await
        {
            return Err(StageFailure::transient("登录页未出现邮箱输入框"));
        }
        if !session.fill(&p.email_fields, &self.credentials.email).await? {
            return Err(SessionError::not_found("邮箱输入框").into());
        }

        // 两步登录：先提交邮箱再出现密码框
        let password_field = WaitCondition::AnyVisible(p.password_fields.clone());
        if !session.probe(&password_field).await? {
            session.find_and_click(&p.next_buttons).await?;
            if !session
                .wait_for_condition(&password_field, config.stage_timeout(), config.poll_interval())
                .await
            {
                return Err(StageFailure::transient("未出现密码输入框"));
            }
        }
        if !session.fill(&p.password_fields, &self.credentials.password).await? {
            return Err(SessionError::not_found("密码输入框").into());
        }
        click(session, &p.sign_in_buttons, "登录按钮").await?;

        waits::settle_network(session, config.idle_sub_timeout(), config.poll_interval()).await;
        self.check_rejected(session).await?;

        let signal = waits::settle(
            session,
            &[
                WaitStrategy::condition(
                    WaitCondition::AnyVisible(p.dashboard_indicators.clone()),
                    config.stage_timeout(),
                ),
                WaitStrategy::Pause(config.post_login_wait()),
                WaitStrategy::condition(
                    WaitCondition::UrlExcludes(p.login_url_markers.clone()),
                    config.idle_sub_timeout(),
                ),
            ],
            config.poll_interval(),
        )
        .await;

        self.check_rejected(session).await?;
        match signal {
            Some(0) => Ok(StepOk::detail("登录成功")),
            Some(_) => Ok(StepOk::detail("登录成功 (已离开登录页)")),
            None => Err(StageFailure::transient("登录后未进入门户主页")),
        }
    }

    async fn locate_upload_control(
        &self,
        session: &mut dyn PortalSession,
        ctx: &StageCtx<'_>,
    ) -> StepResult {
        let config = ctx.config();
        let p = &self.profile;

        if ctx.is_retry() {
            session.reload().await?;
            waits::settle_network(session, config.idle_sub_timeout(), config.poll_interval()).await;
        }

        click(session, &p.upload_links, "批量上传入口").await?;
        waits::settle_network(session, config.idle_sub_timeout(), config.poll_interval()).await;

        let file_input = WaitCondition::AnyPresent(p.file_inputs.clone());
        if session
            .wait_for_condition(&file_input, config.stage_timeout(), config.poll_interval())
            .await
        {
            Ok(StepOk::detail("已打开批量上传页面"))
        } else {
            Err(StageFailure::transient("上传页面未出现文件输入框"))
        }
    }

    async fn upload_file(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        let config = ctx.config();
        let p = &self.profile;
        let file = &ctx.request.file_path;

        if !session.attach_file(&p.file_inputs, file).await? {
            return Err(SessionError::not_found("文件输入框").into());
        }
        info!("{} 📤 已选择文件 {}", ctx.request, ctx.request.file_name());

        // 门户选中文件后自动上传并校验，成功提示可能不出现
        let confirmed = waits::settle(
            session,
            &[WaitStrategy::condition(
                WaitCondition::AnyVisible(p.upload_success_indicators.clone()),
                config.post_upload_wait(),
            )],
            config.poll_interval(),
        )
        .await
        .is_some();

        if confirmed {
            Ok(StepOk::detail("上传完成"))
        } else {
            warn!("{} ⚠️ 未检测到上传成功提示，按已上传处理", ctx.request);
            Ok(StepOk::detail("上传完成 (未检测到成功提示)"))
        }
    }

    async fn wait_for_listing(
        &self,
        session: &mut dyn PortalSession,
        ctx: &StageCtx<'_>,
    ) -> Result<(), StageFailure> {
        let config = ctx.config();
        let signal = waits::settle(
            session,
            &[
                WaitStrategy::condition(
                    WaitCondition::AnyVisible(self.profile.listing_ready_indicators.clone()),
                    config.idle_sub_timeout(),
                ),
                WaitStrategy::condition(WaitCondition::NetworkIdle, config.idle_sub_timeout()),
                WaitStrategy::condition(
                    WaitCondition::AnyVisible(self.profile.listing_ready_indicators.clone()),
                    config.stage_timeout(),
                ),
            ],
            config.poll_interval(),
        )
        .await;

        match signal {
            Some(1) => {
                // 网络已空闲，再确认一次表格确实存在
                let ready = WaitCondition::AnyVisible(self.profile.listing_ready_indicators.clone());
                if session.probe(&ready).await? {
                    Ok(())
                } else {
                    Err(StageFailure::transient("订单列表未加载"))
                }
            }
            Some(_) => Ok(()),
            None => Err(StageFailure::transient("订单列表未加载")),
        }
    }

    async fn view_orders(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        click(session, &self.profile.view_orders_buttons, "View uploaded orders").await?;
        self.wait_for_listing(session, ctx).await?;
        Ok(StepOk::detail("已打开上传订单列表"))
    }

    async fn order_confirmation(
        &self,
        session: &mut dyn PortalSession,
        ctx: &StageCtx<'_>,
    ) -> StepResult {
        if ctx.is_retry() {
            session.reload().await?;
        }
        click(session, &self.profile.order_confirmation_links, "Order confirmation").await?;
        self.wait_for_listing(session, ctx).await?;
        Ok(StepOk::detail("已打开 Order confirmation 页面"))
    }

    async fn select_orders(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        let request = ctx.request;
        self.wait_for_listing(session, ctx).await?;

        let entries = session.list_entries().await?;
        debug!("{} 列表条目 {} 条", request, entries.len());

        let selector = if self.prefer_today {
            self.selector.clone().prefer_date(Local::now().date_naive())
        } else {
            self.selector.clone()
        };
        let selection = selector
            .select(&entries, &request.reference, &request.service_levels)
            .map_err(|e| match e {
                // 列表可能还没刷新，阶段内重试
                SelectionError::NoMatch { .. } => StageFailure::transient(e.to_string()),
                SelectionError::NoExpectedLevel { .. } => StageFailure::structural(e.to_string()),
            })?;

        for entry in &selection.chosen {
            if !session.select_entry(entry).await? {
                return Err(StageFailure::transient(format!(
                    "无法勾选订单 {} ({})",
                    entry.reference, entry.service_level_label
                )));
            }
        }
        if !selection.missing_levels.is_empty() {
            warn!("{} ⚠️ {}", request, selection.detail());
        }

        Ok(StepOk::detail(selection.detail()).with_selection(selection))
    }

    async fn download_document(
        &self,
        session: &mut dyn PortalSession,
        ctx: &StageCtx<'_>,
    ) -> StepResult {
        let config = ctx.config();
        if ctx.state.selection.is_none() {
            return Err(StageFailure::structural("尚未勾选任何订单"));
        }

        // 操作过快时门户会报 "unexpected error"
        if !config.pre_print_delay().is_zero() {
            sleep(config.pre_print_delay()).await;
        }

        let file_name = format!(
            "{}_{}_{}.pdf",
            self.profile.document_prefix,
            file_safe(&ctx.request.reference),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let save_as = config.output_dir().join(file_name);
        let document = session
            .download(&self.profile.print_buttons, &save_as, config.stage_timeout())
            .await?;

        Ok(StepOk::detail(format!("已保存 {}", document.display())).with_document(document))
    }

    async fn print(&self, ctx: &StageCtx<'_>) -> StepResult {
        let document = ctx
            .state
            .document
            .as_ref()
            .ok_or_else(|| StageFailure::structural("没有可打印的文档"))?;
        let printer = self
            .printer
            .as_ref()
            .ok_or_else(|| StageFailure::structural("未配置打印机"))?;

        printer
            .print(document)
            .await
            .map_err(|e| StageFailure::transient(e.to_string()))?;
        Ok(StepOk::detail(format!("已通过 {} 打印", printer.name())))
    }
}

/// 绑定到一个阶段的门户实现
struct PortalStep {
    stage: Stage,
    portal: Arc<PortalSteps>,
}

#[async_trait]
impl StageStep for PortalStep {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn attempt(&self, session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        let portal = &self.portal;
        match self.stage {
            Stage::Login => portal.login(session, ctx).await,
            Stage::LocateUploadControl => portal.locate_upload_control(session, ctx).await,
            Stage::UploadFile => portal.upload_file(session, ctx).await,
            Stage::ViewOrders => portal.view_orders(session, ctx).await,
            Stage::OrderConfirmationFallback => portal.order_confirmation(session, ctx).await,
            Stage::SelectOrders => portal.select_orders(session, ctx).await,
            Stage::DownloadDocument => portal.download_document(session, ctx).await,
            Stage::Print => portal.print(ctx).await,
        }
    }
}
