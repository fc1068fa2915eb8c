//! 待提交的清单任务

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::submission::ServiceLevel;

/// 队列目录中的一个清单任务（一个 TOML 文件）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestJob {
    /// 由清单生成器产出的上传文件
    pub manifest: PathBuf,
    /// PO 号
    pub reference: String,
    /// 期望的服务等级，缺省为 Standard + Premium
    #[serde(default = "default_levels")]
    pub service_levels: Vec<ServiceLevel>,
    /// 任务文件自身路径（加载时填充）
    #[serde(skip)]
    pub job_file: Option<PathBuf>,
}

fn default_levels() -> Vec<ServiceLevel> {
    ServiceLevel::ALL.to_vec()
}
