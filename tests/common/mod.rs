//! 测试替身：脚本化会话、会话工厂和阶段
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use manifest_portal_submit::config::EngineConfig;
use manifest_portal_submit::error::{SessionError, SessionResult, StageFailure};
use manifest_portal_submit::infrastructure::{PortalSession, SessionFactory, WaitCondition};
use manifest_portal_submit::models::{ListingEntry, Selector, ServiceLevel, SubmissionRequest};
use manifest_portal_submit::services::Selection;
use manifest_portal_submit::workflow::{Stage, StageCtx, StageEngine, StageStep, StepOk, StepResult};
use tempfile::TempDir;

/// 假门户的可观察状态
#[derive(Debug, Default)]
pub struct PortalState {
    /// 按顺序记录的会话调用
    pub calls: Vec<String>,
    /// `error_indicator` 依次返回的值，用完后返回 None
    pub errors: VecDeque<Option<String>>,
    /// 页面正文（用于 TextPresent）
    pub page_text: String,
    /// 候选选择器提到这些文本时视为控件不存在
    pub missing: Vec<String>,
    pub entries: Vec<ListingEntry>,
    pub selected: Vec<String>,
    pub screenshots: usize,
    pub closed: usize,
}

impl PortalState {
    fn absent(&self, candidates: &[Selector]) -> bool {
        candidates
            .iter()
            .any(|c| self.missing.iter().any(|m| c.mentions(m)))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub type SharedPortal = Arc<Mutex<PortalState>>;

pub struct FakeSession {
    portal: SharedPortal,
}

impl FakeSession {
    fn record(&self, call: impl Into<String>) {
        self.portal.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl PortalSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        self.record(format!("navigate:{}", url));
        Ok(())
    }

    async fn find_and_click(&mut self, candidates: &[Selector]) -> SessionResult<bool> {
        let mut portal = self.portal.lock().unwrap();
        let found = !portal.absent(candidates);
        let label = candidates
            .first()
            .map(|c| c.text.clone().unwrap_or_else(|| c.css.clone()))
            .unwrap_or_default();
        portal.calls.push(format!("click:{}", label));
        Ok(found)
    }

    async fn fill(&mut self, candidates: &[Selector], value: &str) -> SessionResult<bool> {
        let mut portal = self.portal.lock().unwrap();
        portal.calls.push(format!("fill:{}", value));
        Ok(!portal.absent(candidates))
    }

    async fn attach_file(&mut self, candidates: &[Selector], file: &Path) -> SessionResult<bool> {
        let mut portal = self.portal.lock().unwrap();
        portal.calls.push(format!("attach:{}", file.display()));
        Ok(!portal.absent(candidates))
    }

    async fn probe(&mut self, condition: &WaitCondition) -> SessionResult<bool> {
        let portal = self.portal.lock().unwrap();
        Ok(match condition {
            WaitCondition::NetworkIdle | WaitCondition::UrlExcludes(_) => true,
            WaitCondition::AnyVisible(c) | WaitCondition::AnyPresent(c) => !portal.absent(c),
            WaitCondition::TextPresent(keywords) => {
                let text = portal.page_text.to_lowercase();
                keywords.iter().any(|k| text.contains(&k.to_lowercase()))
            }
        })
    }

    async fn list_entries(&mut self) -> SessionResult<Vec<ListingEntry>> {
        let mut portal = self.portal.lock().unwrap();
        portal.calls.push("list".to_string());
        Ok(portal.entries.clone())
    }

    async fn select_entry(&mut self, entry: &ListingEntry) -> SessionResult<bool> {
        let mut portal = self.portal.lock().unwrap();
        portal.calls.push(format!("select:{}", entry.handle));
        portal.selected.push(entry.handle.clone());
        Ok(true)
    }

    async fn download(
        &mut self,
        trigger: &[Selector],
        save_as: &Path,
        _timeout: Duration,
    ) -> SessionResult<PathBuf> {
        {
            let mut portal = self.portal.lock().unwrap();
            portal.calls.push("download".to_string());
            if portal.absent(trigger) {
                return Err(SessionError::not_found("打印/下载按钮"));
            }
        }
        if let Some(parent) = save_as.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
        }
        std::fs::write(save_as, b"%PDF-1.4").map_err(|e| SessionError::io(save_as, e))?;
        Ok(save_as.to_path_buf())
    }

    async fn error_indicator(&mut self) -> SessionResult<Option<String>> {
        Ok(self.portal.lock().unwrap().errors.pop_front().flatten())
    }

    async fn dismiss_error_indicator(&mut self) -> SessionResult<bool> {
        self.record("dismiss");
        Ok(true)
    }

    async fn reload(&mut self) -> SessionResult<()> {
        self.record("reload");
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> SessionResult<PathBuf> {
        self.portal.lock().unwrap().screenshots += 1;
        Ok(path.to_path_buf())
    }

    async fn close(&mut self) {
        self.portal.lock().unwrap().closed += 1;
    }
}

/// 每次打开都返回共享同一个假门户的会话
#[derive(Default)]
pub struct FakeFactory {
    pub portal: SharedPortal,
    pub opens: AtomicUsize,
    /// 依次返回的打开失败
    pub open_failures: Mutex<VecDeque<SessionError>>,
}

impl FakeFactory {
    pub fn new(portal: SharedPortal) -> Self {
        Self {
            portal,
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self, error: SessionError) {
        self.open_failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open_session(&self) -> SessionResult<Box<dyn PortalSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.open_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(Box::new(FakeSession {
            portal: Arc::clone(&self.portal),
        }))
    }
}

/// 脚本化阶段的单次结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Ok,
    Transient,
    Structural,
    Fatal,
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// 按脚本返回结果的阶段，脚本用完后使用默认结果
pub struct ScriptedStep {
    stage: Stage,
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    calls: AtomicUsize,
    hook: Option<Hook>,
}

impl ScriptedStep {
    pub fn new(stage: Stage, script: Vec<Script>, fallback: Script) -> Self {
        Self {
            stage,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            hook: None,
        }
    }

    /// 每次尝试开始时调用，参数是第几次调用（从 1 开始）
    pub fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageStep for ScriptedStep {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn attempt(&self, _session: &mut dyn PortalSession, ctx: &StageCtx<'_>) -> StepResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(call);
        }
        let next = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);

        match next {
            Script::Ok => {
                let ok = StepOk::detail(format!("{} ok", self.stage));
                Ok(match self.stage {
                    Stage::SelectOrders => ok.with_selection(Selection {
                        chosen: vec![ListingEntry::new(
                            ctx.request.reference.clone(),
                            "STANDARD MAIL SORTED",
                            "0",
                        )],
                        matched: 1,
                        missing_levels: vec![ServiceLevel::Premium],
                        note: None,
                    }),
                    Stage::DownloadDocument => {
                        ok.with_document(ctx.config().output_dir().join("confirmation.pdf"))
                    }
                    _ => ok,
                })
            }
            Script::Transient => Err(StageFailure::transient(format!("{} transient", self.stage))),
            Script::Structural => Err(StageFailure::structural(format!("{} structural", self.stage))),
            Script::Fatal => Err(StageFailure::fatal(format!("{} fatal", self.stage))),
        }
    }
}

const SCRIPTED_STAGES: [Stage; 7] = [
    Stage::Login,
    Stage::LocateUploadControl,
    Stage::UploadFile,
    Stage::ViewOrders,
    Stage::OrderConfirmationFallback,
    Stage::SelectOrders,
    Stage::DownloadDocument,
];

/// 引擎测试装置：所有阶段默认成功
pub struct Harness {
    pub portal: SharedPortal,
    pub factory: Arc<FakeFactory>,
    pub steps: HashMap<Stage, Arc<ScriptedStep>>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let portal = SharedPortal::default();
        let steps = SCRIPTED_STAGES
            .into_iter()
            .map(|stage| (stage, Arc::new(ScriptedStep::new(stage, Vec::new(), Script::Ok))))
            .collect();
        Self {
            factory: Arc::new(FakeFactory::new(Arc::clone(&portal))),
            portal,
            steps,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// 替换一个阶段的脚本
    pub fn script(mut self, stage: Stage, script: Vec<Script>, fallback: Script) -> Self {
        self.steps
            .insert(stage, Arc::new(ScriptedStep::new(stage, script, fallback)));
        self
    }

    pub fn step(mut self, step: ScriptedStep) -> Self {
        self.steps.insert(step.stage(), Arc::new(step));
        self
    }

    pub fn engine(&self) -> StageEngine {
        let steps: Vec<Arc<dyn StageStep>> = self
            .steps
            .values()
            .map(|s| Arc::clone(s) as Arc<dyn StageStep>)
            .collect();
        StageEngine::new(self.factory.clone() as Arc<dyn SessionFactory>, steps)
    }

    /// 阶段重试 2 次（每阶段最多 3 次尝试），整体重试 1 次，所有等待为零
    pub fn config(&self) -> EngineConfig {
        EngineConfig::immediate(self.dir.path())
            .with_stage_retries(2)
            .with_overall_retries(1)
    }

    pub fn request(&self) -> SubmissionRequest {
        self.request_with(self.config())
    }

    pub fn request_with(&self, config: EngineConfig) -> SubmissionRequest {
        SubmissionRequest::new(
            self.dir.path().join("manifest.csv"),
            "PO123",
            ServiceLevel::ALL,
            config,
        )
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.steps.get(&stage).map(|s| s.calls()).unwrap_or(0)
    }

    pub fn portal(&self) -> std::sync::MutexGuard<'_, PortalState> {
        self.portal.lock().unwrap()
    }
}
