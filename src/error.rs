use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器会话错误
    #[error("浏览器错误: {0}")]
    Session(#[from] SessionError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 打印错误
    #[error("打印错误: {0}")]
    Print(#[from] PrintError),
}

/// 浏览器会话错误
///
/// 会话能力层（`PortalSession`）返回的所有错误都归到这里，
/// 由 [`SessionError::kind`] 决定流程层如何处理。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 启动浏览器失败
    #[error("启动浏览器失败: {0}")]
    LaunchFailed(String),
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {message}")]
    ConnectionFailed { port: u16, message: String },
    /// 导航失败
    #[error("导航到 {url} 失败: {message}")]
    NavigationFailed { url: String, message: String },
    /// 所有候选选择器都没有找到控件
    #[error("未找到控件: {what}")]
    ControlNotFound { what: String },
    /// 等待超时
    #[error("等待超时 ({what}, {timeout_ms}ms)")]
    Timeout { what: String, timeout_ms: u64 },
    /// 执行脚本失败
    #[error("执行脚本失败: {0}")]
    Script(String),
    /// 与浏览器的连接已断开
    #[error("浏览器连接已断开: {0}")]
    Disconnected(String),
    /// 本地文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// 错误分类
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::LaunchFailed(_)
            | SessionError::ConnectionFailed { .. }
            | SessionError::Disconnected(_) => FailureKind::Fatal,
            SessionError::ControlNotFound { .. } => FailureKind::Structural,
            SessionError::NavigationFailed { .. }
            | SessionError::Timeout { .. }
            | SessionError::Script(_)
            | SessionError::Io { .. } => FailureKind::Transient,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        SessionError::ControlNotFound { what: what.into() }
    }
}

impl From<chromiumoxide::error::CdpError> for SessionError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;
        match err {
            CdpError::Ws(_) | CdpError::NoResponse | CdpError::ChannelSendError(_) => {
                SessionError::Disconnected(err.to_string())
            }
            CdpError::Timeout => SessionError::Timeout {
                what: "CDP 请求".to_string(),
                timeout_ms: 0,
            },
            CdpError::NotFound => SessionError::ControlNotFound {
                what: err.to_string(),
            },
            other => SessionError::Script(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Script(format!("JSON 解析失败: {}", err))
    }
}

/// 会话操作结果类型
pub type SessionResult<T> = Result<T, SessionError>;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 缺少门户登录凭据
    #[error("缺少门户登录凭据: 请设置 {email_var} 和 {password_var}")]
    MissingCredentials {
        email_var: &'static str,
        password_var: &'static str,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 打印错误
#[derive(Debug, Error)]
pub enum PrintError {
    /// 待打印文档不存在
    #[error("待打印文档不存在: {0}")]
    DocumentMissing(PathBuf),
    /// 没有可用的打印后端
    #[error("没有可用的打印后端")]
    NoBackend,
    /// 打印命令启动失败
    #[error("{backend} 启动失败: {source}")]
    SpawnFailed {
        backend: String,
        #[source]
        source: std::io::Error,
    },
    /// 打印命令返回失败
    #[error("{backend} 打印失败: {message}")]
    CommandFailed { backend: String, message: String },
    /// 所有打印后端都失败
    #[error("所有打印后端都失败: {0}")]
    AllBackendsFailed(String),
}

/// 失败分类
///
/// - `Transient`：控件尚未出现、页面未稳定、门户页内错误提示，阶段内重试
/// - `Structural`：遍历所有候选选择器后仍未找到预期控件，该阶段不再升级为整体重试
/// - `Fatal`：登录被拒、网络不可达，立即终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Structural,
    Fatal,
}

/// 阶段失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    /// 是否由门户页内错误提示引起（需要执行恢复流程）
    pub portal_error: bool,
}

impl StageFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            portal_error: false,
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Structural,
            message: message.into(),
            portal_error: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
            portal_error: false,
        }
    }

    /// 门户页内错误提示，可恢复
    pub fn portal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            portal_error: true,
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<SessionError> for StageFailure {
    fn from(err: SessionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            portal_error: false,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
