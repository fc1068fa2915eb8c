//! 单个清单处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一个清单任务的完整生命周期，是任务级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **构建请求**：任务 + 配置 → `SubmissionRequest`
//! 2. **执行提交**：委托 `StageEngine`
//! 3. **结果处置**：归档任务文件、写入人工处理记录

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::FileError;
use crate::models::{ManifestJob, SubmissionRequest};
use crate::services::ManualActionWriter;
use crate::utils::logging::truncate_text;
use crate::workflow::{Disposition, StageEngine, SubmissionResult, SubmissionStatus};

/// 由任务和配置构建提交请求
pub fn build_request(job: &ManifestJob, config: &Config) -> SubmissionRequest {
    SubmissionRequest::new(
        job.manifest.clone(),
        job.reference.clone(),
        job.service_levels.iter().copied(),
        config.engine_config(),
    )
}

/// 处理单个清单任务
///
/// # 返回
/// 返回最终提交状态；只有本地文件操作失败时返回错误
pub async fn process_job(
    engine: &StageEngine,
    job: &ManifestJob,
    config: &Config,
    writer: &ManualActionWriter,
) -> Result<SubmissionStatus> {
    if !job.manifest.exists() {
        return Err(FileError::NotFound {
            path: job.manifest.display().to_string(),
        }
        .into());
    }

    let request = build_request(job, config);
    let result = engine.run(&request).await;
    log_result(&request, &result);

    apply_disposition(job, &result, config, writer).await?;
    Ok(result.status)
}

/// 根据结果处置任务文件
pub async fn apply_disposition(
    job: &ManifestJob,
    result: &SubmissionResult,
    config: &Config,
    writer: &ManualActionWriter,
) -> Result<()> {
    let disposition = result.disposition();
    debug!("PO {} 处置方式: {:?}", result.reference, disposition);

    if result.requires_manual_intervention() {
        writer
            .write(&job.manifest, result)
            .await
            .context("写入人工处理记录失败")?;
        warn!(
            "[PO {}] 📝 已写入人工处理记录: {}",
            result.reference,
            writer.path().display()
        );
    }

    match disposition {
        Disposition::Completed | Disposition::ManualPrint => {
            if let Some(job_file) = &job.job_file {
                let archived = archive_job_file(job_file, Path::new(&config.archive_folder)).await?;
                info!("[PO {}] 📁 任务已归档: {}", result.reference, archived.display());
            }
        }
        Disposition::ManualIntervention => {
            info!("[PO {}] 任务保留在队列中，修复后可重新提交", result.reference);
        }
        Disposition::Requeue => {
            info!("[PO {}] 任务保留在队列中，下次运行继续", result.reference);
        }
    }
    Ok(())
}

/// 将任务文件移入归档目录，返回新路径
pub async fn archive_job_file(job_file: &Path, archive_folder: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(archive_folder)
        .await
        .map_err(|source| FileError::WriteFailed {
            path: archive_folder.display().to_string(),
            source,
        })?;

    let file_name = job_file
        .file_name()
        .with_context(|| format!("无效的任务文件路径: {}", job_file.display()))?;
    let target = archive_folder.join(file_name);

    if tokio::fs::rename(job_file, &target).await.is_err() {
        tokio::fs::copy(job_file, &target)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: target.display().to_string(),
                source,
            })?;
        tokio::fs::remove_file(job_file)
            .await
            .with_context(|| format!("无法删除已归档的任务文件: {}", job_file.display()))?;
    }
    Ok(target)
}

fn log_result(request: &SubmissionRequest, result: &SubmissionResult) {
    info!(
        "{} 结果: {} | {} 轮 | {:.1}s",
        request,
        result.status,
        result.rounds,
        result.elapsed.as_secs_f64()
    );
    if let Some(document) = &result.document {
        info!("{} 📄 确认单: {}", request, document.display());
    }
    if !result.selected.is_empty() {
        let handles: Vec<String> = result
            .selected
            .iter()
            .map(|e| format!("{} {}", e.reference, e.service_level_label))
            .collect();
        debug!("{} 已选订单: {}", request, handles.join(" | "));
    }
    match result.status {
        SubmissionStatus::Success | SubmissionStatus::Cancelled => {
            debug!("{} 阶段轨迹:\n{}", request, result.trace_summary())
        }
        SubmissionStatus::PartialSuccess | SubmissionStatus::Failed => {
            warn!("{} 阶段轨迹:\n{}", request, result.trace_summary());
            if let Some(message) = &result.message {
                error!("{} 最后错误: {}", request, truncate_text(message, 200));
            }
            for artifact in &result.artifacts {
                warn!("{} 🖼️ 诊断截图: {}", request, artifact.display());
            }
        }
    }
}
