use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{AppResult, ConfigError};
use crate::services::order_selector::MatchPolicy;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 待提交任务所在目录
    pub queue_folder: String,
    /// 处理完成的任务移入的目录
    pub archive_folder: String,
    /// 下载文件和诊断截图的输出目录
    pub output_dir: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 需要人工处理的提交记录文件
    pub manual_action_file: String,
    /// 门户描述文件（为空时使用内置的 Spring GDS 描述）
    pub profile_file: Option<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 下载成功后是否自动打印
    pub auto_print: bool,
    pub browser: BrowserSettings,
    pub portal: PortalSettings,
    pub matching: MatchPolicy,
    pub printer: PrintSettings,
    /// 登录凭据只从环境变量读取
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_folder: "manifest_queue".to_string(),
            archive_folder: "manifest_queue/done".to_string(),
            output_dir: "output".to_string(),
            output_log_file: "output.txt".to_string(),
            manual_action_file: "manual_action.txt".to_string(),
            profile_file: None,
            verbose_logging: false,
            auto_print: true,
            browser: BrowserSettings::default(),
            portal: PortalSettings::default(),
            matching: MatchPolicy::default(),
            printer: PrintSettings::default(),
            credentials: Credentials::default(),
        }
    }
}

/// 浏览器配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// 连接已启动浏览器的调试端口；为空时自行启动浏览器
    pub debug_port: Option<u16>,
    /// 自行启动时是否使用无头模式
    pub headless: bool,
    /// 浏览器可执行文件路径
    pub executable: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            debug_port: None,
            headless: false,
            executable: None,
        }
    }
}

/// 门户自动化配置（持久化设置）
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    /// 单阶段超时（毫秒），有效范围 5000-120000
    pub timeout_ms: u64,
    /// 整体流程重试次数，有效范围 0-5
    pub retry_count: u32,
    /// 单阶段重试次数，有效范围 0-5
    pub stage_retry_count: u32,
    /// 两次尝试之间的稳定等待
    pub settle_delay_ms: u64,
    pub post_login_wait_ms: u64,
    pub post_upload_wait_ms: u64,
    /// 点击 Print 之前的等待，门户操作过快会报 "unexpected error"
    pub pre_print_delay_ms: u64,
    /// 轮询间隔
    pub poll_interval_ms: u64,
    /// 网络空闲等待的子超时
    pub idle_sub_timeout_ms: u64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_count: 2,
            stage_retry_count: 2,
            settle_delay_ms: 2_000,
            post_login_wait_ms: 5_000,
            post_upload_wait_ms: 7_000,
            pre_print_delay_ms: 4_000,
            poll_interval_ms: 500,
            idle_sub_timeout_ms: 5_000,
        }
    }
}

/// 打印配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// 打印机名称，为空时使用默认打印机
    pub printer_name: Option<String>,
    /// 单个打印后端的超时（秒）
    pub command_timeout_secs: u64,
    pub sumatra_paths: Vec<String>,
    pub acrobat_paths: Vec<String>,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            printer_name: None,
            command_timeout_secs: 30,
            sumatra_paths: vec![
                r"tools\SumatraPDF.exe".to_string(),
                r"C:\Program Files\SumatraPDF\SumatraPDF.exe".to_string(),
                r"C:\Program Files (x86)\SumatraPDF\SumatraPDF.exe".to_string(),
            ],
            acrobat_paths: vec![
                r"C:\Program Files\Adobe\Acrobat DC\Acrobat\Acrobat.exe".to_string(),
                r"C:\Program Files (x86)\Adobe\Acrobat Reader DC\Reader\AcroRd32.exe".to_string(),
            ],
        }
    }
}

/// 门户登录凭据
#[derive(Clone, Default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }

    fn from_env() -> Self {
        let pick = |primary: &str, fallback: &str| {
            std::env::var(primary)
                .or_else(|_| std::env::var(fallback))
                .unwrap_or_default()
        };
        Self {
            email: pick("PORTAL_EMAIL", "SPRING_EMAIL"),
            password: pick("PORTAL_PASSWORD", "SPRING_PASSWORD"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

impl Config {
    /// 加载配置：先读 TOML 文件（可选），再用环境变量覆盖
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p).map_err(|source| {
                    crate::error::FileError::ReadFailed {
                        path: p.display().to_string(),
                        source,
                    }
                })?;
                toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
                    path: p.display().to_string(),
                    source,
                })?
            }
            _ => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            queue_folder: std::env::var("QUEUE_FOLDER").unwrap_or(default.queue_folder),
            archive_folder: std::env::var("ARCHIVE_FOLDER").unwrap_or(default.archive_folder),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(default.output_dir),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            manual_action_file: std::env::var("MANUAL_ACTION_FILE").unwrap_or(default.manual_action_file),
            profile_file: std::env::var("PORTAL_PROFILE").ok().or(default.profile_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            auto_print: std::env::var("AUTO_PRINT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.auto_print),
            browser: BrowserSettings {
                debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).or(default.browser.debug_port),
                headless: std::env::var("BROWSER_HEADLESS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.browser.headless),
                executable: std::env::var("BROWSER_EXECUTABLE").ok().or(default.browser.executable),
            },
            portal: PortalSettings {
                timeout_ms: std::env::var("PORTAL_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.portal.timeout_ms),
                retry_count: std::env::var("PORTAL_RETRY_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.portal.retry_count),
                stage_retry_count: std::env::var("PORTAL_STAGE_RETRY_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.portal.stage_retry_count),
                ..default.portal
            },
            matching: default.matching,
            printer: PrintSettings {
                printer_name: std::env::var("PRINTER_NAME").ok().or(default.printer.printer_name),
                ..default.printer
            },
            credentials: Credentials::from_env(),
        }
    }

    /// 启动前检查登录凭据
    pub fn require_credentials(&self) -> AppResult<&Credentials> {
        if self.credentials.is_valid() {
            Ok(&self.credentials)
        } else {
            Err(ConfigError::MissingCredentials {
                email_var: "PORTAL_EMAIL",
                password_var: "PORTAL_PASSWORD",
            }
            .into())
        }
    }

    /// 构建本次运行的流程配置
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from_settings(&self.portal, &self.output_dir)
    }
}

pub const MAX_RETRIES: u32 = 5;
pub const MIN_STAGE_TIMEOUT_MS: u64 = 5_000;
pub const MAX_STAGE_TIMEOUT_MS: u64 = 120_000;

/// 阶段引擎的不可变配置
///
/// 所有数值在构造时被限制到有效范围内，流程中不再读取任何全局设置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    overall_retries: u32,
    stage_retries: u32,
    stage_timeout: Duration,
    settle_delay: Duration,
    restart_delay: Duration,
    post_login_wait: Duration,
    post_upload_wait: Duration,
    pre_print_delay: Duration,
    poll_interval: Duration,
    idle_sub_timeout: Duration,
    output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&PortalSettings::default(), "output")
    }
}

fn clamp_retries(name: &str, value: u32) -> u32 {
    if value > MAX_RETRIES {
        warn!("{} = {} 超出范围，按 {} 处理", name, value, MAX_RETRIES);
        MAX_RETRIES
    } else {
        value
    }
}

fn clamp_timeout(value_ms: u64) -> Duration {
    let clamped = value_ms.clamp(MIN_STAGE_TIMEOUT_MS, MAX_STAGE_TIMEOUT_MS);
    if clamped != value_ms {
        warn!("阶段超时 {}ms 超出范围，按 {}ms 处理", value_ms, clamped);
    }
    Duration::from_millis(clamped)
}

impl EngineConfig {
    pub fn from_settings(settings: &PortalSettings, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            overall_retries: clamp_retries("retry_count", settings.retry_count),
            stage_retries: clamp_retries("stage_retry_count", settings.stage_retry_count),
            stage_timeout: clamp_timeout(settings.timeout_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            restart_delay: Duration::from_millis(settings.settle_delay_ms),
            post_login_wait: Duration::from_millis(settings.post_login_wait_ms),
            post_upload_wait: Duration::from_millis(settings.post_upload_wait_ms),
            pre_print_delay: Duration::from_millis(settings.pre_print_delay_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            idle_sub_timeout: Duration::from_millis(settings.idle_sub_timeout_ms),
            output_dir: output_dir.into(),
        }
    }

    /// 所有等待为零，用于测试和本地演练
    pub fn immediate(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            settle_delay: Duration::ZERO,
            restart_delay: Duration::ZERO,
            post_login_wait: Duration::ZERO,
            post_upload_wait: Duration::ZERO,
            pre_print_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            idle_sub_timeout: Duration::from_millis(10),
            ..Self::from_settings(&PortalSettings::default(), output_dir)
        }
    }

    pub fn with_overall_retries(mut self, retries: u32) -> Self {
        self.overall_retries = clamp_retries("retry_count", retries);
        self
    }

    pub fn with_stage_retries(mut self, retries: u32) -> Self {
        self.stage_retries = clamp_retries("stage_retry_count", retries);
        self
    }

    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout = clamp_timeout(timeout_ms);
        self
    }

    pub fn with_restart_delay_ms(mut self, delay_ms: u64) -> Self {
        self.restart_delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn overall_retries(&self) -> u32 {
        self.overall_retries
    }

    pub fn stage_retries(&self) -> u32 {
        self.stage_retries
    }

    /// 单阶段最多尝试次数
    pub fn stage_attempts(&self) -> u32 {
        self.stage_retries + 1
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub fn post_login_wait(&self) -> Duration {
        self.post_login_wait
    }

    pub fn post_upload_wait(&self) -> Duration {
        self.post_upload_wait
    }

    pub fn pre_print_delay(&self) -> Duration {
        self.pre_print_delay
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn idle_sub_timeout(&self) -> Duration {
        self.idle_sub_timeout
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 诊断截图目录
    pub fn diagnostics_dir(&self) -> PathBuf {
        self.output_dir.join("diagnostics")
    }

    /// 单次阶段尝试的硬上限，任何会话调用挂起都不会超过它
    pub fn attempt_ceiling(&self) -> Duration {
        self.stage_timeout * 2
            + self.pre_print_delay
            + self.post_login_wait.max(self.post_upload_wait)
    }
}
