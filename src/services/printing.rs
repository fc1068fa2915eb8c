//! 打印服务 - 业务能力层
//!
//! 只负责"把一个 PDF 发送到打印机"，按优先级依次尝试多个打印后端。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PrintSettings;
use crate::error::PrintError;

/// 文档打印能力
#[async_trait]
pub trait DocumentPrinter: Send + Sync {
    fn name(&self) -> &str;

    async fn print(&self, document: &Path) -> Result<(), PrintError>;
}

/// 调用外部程序打印
///
/// 参数中的 `{file}` 会被替换为文档路径。
#[derive(Debug, Clone)]
pub struct CommandPrinter {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPrinter {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            timeout,
        }
    }

    /// SumatraPDF 静默单面打印
    pub fn sumatra(program: impl Into<PathBuf>, printer: Option<&str>, timeout: Duration) -> Self {
        let mut args = match printer {
            Some(name) => vec!["-print-to".to_string(), name.to_string()],
            None => vec!["-print-to-default".to_string()],
        };
        args.extend(["-print-settings", "simplex", "-silent", "{file}"].map(String::from));
        Self::new("SumatraPDF", program, args, timeout)
    }

    /// Acrobat / Reader 的 `/t` 打印
    pub fn acrobat(program: impl Into<PathBuf>, printer: Option<&str>, timeout: Duration) -> Self {
        let mut args = vec!["/t".to_string(), "{file}".to_string()];
        if let Some(name) = printer {
            args.push(name.to_string());
        }
        Self::new("Acrobat", program, args, timeout)
    }

    /// CUPS `lp`
    pub fn lp(printer: Option<&str>, timeout: Duration) -> Self {
        let mut args = Vec::new();
        if let Some(name) = printer {
            args.push("-d".to_string());
            args.push(name.to_string());
        }
        args.extend(["-o", "sides=one-sided", "{file}"].map(String::from));
        Self::new("lp", "lp", args, timeout)
    }

    fn render_args(&self, document: &Path) -> Vec<String> {
        let file = document.to_string_lossy();
        self.args.iter().map(|a| a.replace("{file}", &file)).collect()
    }
}

#[async_trait]
impl DocumentPrinter for CommandPrinter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn print(&self, document: &Path) -> Result<(), PrintError> {
        if !document.exists() {
            return Err(PrintError::DocumentMissing(document.to_path_buf()));
        }

        let args = self.render_args(document);
        debug!("{} {}", self.program.display(), args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PrintError::SpawnFailed {
                backend: self.name.clone(),
                source,
            })?;

        match timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => Err(PrintError::CommandFailed {
                backend: self.name.clone(),
                message: format!("超过 {} 秒未完成", self.timeout.as_secs()),
            }),
            Ok(Err(source)) => Err(PrintError::SpawnFailed {
                backend: self.name.clone(),
                source,
            }),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(PrintError::CommandFailed {
                backend: self.name.clone(),
                message: format!(
                    "{} {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }
}

/// 按优先级尝试的打印后端链
pub struct PrinterChain {
    backends: Vec<Arc<dyn DocumentPrinter>>,
}

impl PrinterChain {
    pub fn new(backends: Vec<Arc<dyn DocumentPrinter>>) -> Self {
        Self { backends }
    }

    /// 根据打印配置和本机已安装的程序组装后端链
    pub fn from_settings(settings: &PrintSettings) -> Self {
        let limit = Duration::from_secs(settings.command_timeout_secs.max(1));
        let printer = settings.printer_name.as_deref();
        let mut backends: Vec<Arc<dyn DocumentPrinter>> = Vec::new();

        for path in settings.sumatra_paths.iter().filter(|p| Path::new(p).exists()) {
            backends.push(Arc::new(CommandPrinter::sumatra(path, printer, limit)));
        }
        for path in settings.acrobat_paths.iter().filter(|p| Path::new(p).exists()) {
            backends.push(Arc::new(CommandPrinter::acrobat(path, printer, limit)));
        }
        if cfg!(unix) {
            backends.push(Arc::new(CommandPrinter::lp(printer, limit)));
        }

        debug!(
            "打印后端: {}",
            backends.iter().map(|b| b.name()).collect::<Vec<_>>().join(" → ")
        );
        Self::new(backends)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }
}

#[async_trait]
impl DocumentPrinter for PrinterChain {
    fn name(&self) -> &str {
        "打印链"
    }

    async fn print(&self, document: &Path) -> Result<(), PrintError> {
        if self.backends.is_empty() {
            return Err(PrintError::NoBackend);
        }
        if !document.exists() {
            return Err(PrintError::DocumentMissing(document.to_path_buf()));
        }

        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.print(document).await {
                Ok(()) => {
                    info!("🖨️ 已通过 {} 打印 {}", backend.name(), document.display());
                    return Ok(());
                }
                Err(e) => {
                    warn!("⚠️ {} 打印失败，尝试下一个后端: {}", backend.name(), e);
                    failures.push(e.to_string());
                }
            }
        }
        Err(PrintError::AllBackendsFailed(failures.join("; ")))
    }
}
