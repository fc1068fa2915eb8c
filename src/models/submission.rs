//! 提交请求
//!
//! 一次门户提交所需的全部输入：清单文件、PO 号、期望的服务等级和本次运行的配置。

use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// 服务等级
///
/// 门户会为同一个 PO 按服务等级拆成多条订单（STANDARD MAIL SORTED / PREMIUM MAIL SORTED）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceLevel {
    /// Standard / Economy
    Standard,
    /// Premium / Priority
    Premium,
}

impl ServiceLevel {
    pub const ALL: [ServiceLevel; 2] = [ServiceLevel::Standard, ServiceLevel::Premium];

    /// 从门户列表上的服务等级文本识别服务等级
    pub fn from_label(label: &str) -> Option<Self> {
        let upper = label.to_uppercase();
        if upper.contains("PREMIUM") || upper.contains("PRIORITY") {
            Some(ServiceLevel::Premium)
        } else if upper.contains("STANDARD") || upper.contains("ECONOMY") {
            Some(ServiceLevel::Standard)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceLevel::Standard => "standard",
            ServiceLevel::Premium => "premium",
        }
    }
}

impl Display for ServiceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceLevel::Standard => write!(f, "Standard"),
            ServiceLevel::Premium => write!(f, "Premium"),
        }
    }
}

impl FromStr for ServiceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceLevel::from_label(s.trim()).ok_or_else(|| format!("无法识别的服务等级: {}", s))
    }
}

/// 提交请求
///
/// 在一次提交的整个生命周期内不可变。
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    /// 待上传的清单文件
    pub file_path: PathBuf,
    /// 业务参考号（PO）
    pub reference: String,
    /// 期望在列表上出现的服务等级
    pub service_levels: BTreeSet<ServiceLevel>,
    /// 本次运行的超时和重试配置
    pub config: EngineConfig,
}

impl SubmissionRequest {
    pub fn new(
        file_path: impl Into<PathBuf>,
        reference: impl Into<String>,
        service_levels: impl IntoIterator<Item = ServiceLevel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            reference: reference.into(),
            service_levels: service_levels.into_iter().collect(),
            config,
        }
    }

    /// 清单文件名（仅用于日志显示）
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

impl Display for SubmissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[PO {}]", self.reference)
    }
}
