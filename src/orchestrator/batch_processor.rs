//! 批量清单处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责队列中所有清单任务的处理和资源装配。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、登录凭据检查、门户描述、会话工厂和阶段引擎
//! 2. **批量加载**：扫描并加载队列目录中所有任务（`Vec<ManifestJob>`）
//! 3. **顺序处理**：门户的会话和勾选状态不能并发共享，任务严格逐个提交
//! 4. **取消**：Ctrl-C 触发取消令牌，引擎在阶段边界停止
//! 5. **全局统计**：汇总所有任务的处理结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个提交的细节
//! - **向下委托**：委托 submission_processor 处理单个任务

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::ChromeSessionFactory;
use crate::config::Config;
use crate::models::{load_all_jobs, ManifestJob, PortalProfile};
use crate::orchestrator::submission_processor;
use crate::services::{ManualActionWriter, OrderSelector, PrinterChain};
use crate::utils::logging::{
    init_log_file, log_job_start, log_jobs_loaded, log_startup, print_final_stats, RunStats,
};
use crate::workflow::{PortalSteps, StageEngine, SubmissionStatus};

/// 应用主结构
pub struct App {
    config: Config,
    engine: StageEngine,
    writer: ManualActionWriter,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        let engine_config = config.engine_config();
        let credentials = config.require_credentials()?.clone();

        let profile = match &config.profile_file {
            Some(path) => PortalProfile::from_toml_file(Path::new(path))?,
            None => PortalProfile::default(),
        };
        let profile = Arc::new(profile);

        log_startup(
            &profile.name,
            engine_config.overall_retries(),
            engine_config.stage_retries(),
            config.auto_print,
        );

        let factory = Arc::new(ChromeSessionFactory::new(
            config.browser.clone(),
            Arc::clone(&profile),
            Path::new(&config.output_dir).join("downloads"),
            engine_config.poll_interval(),
        ));

        let mut portal = PortalSteps::new(profile, credentials, OrderSelector::new(config.matching));
        if config.auto_print {
            let chain = PrinterChain::from_settings(&config.printer);
            if chain.is_empty() {
                warn!("⚠️ 未找到可用的打印程序，确认单需要手动打印");
            } else {
                info!("🖨️ 可用打印后端 {} 个", chain.len());
                portal = portal.with_printer(Arc::new(chain));
            }
        }

        let engine = StageEngine::new(factory, portal.into_steps());
        let writer = ManualActionWriter::with_path(&config.manual_action_file);

        Ok(Self {
            config,
            engine,
            writer,
        })
    }

    /// 取消令牌，触发后当前阶段完成即停止
    pub fn cancellation_token(&self) -> CancellationToken {
        self.engine.cancellation_token()
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        // 加载所有待提交的任务
        info!("\n📁 正在扫描待提交的清单...");
        let jobs = load_all_jobs(&self.config.queue_folder).await?;

        if jobs.is_empty() {
            warn!("⚠️ 没有找到待处理的任务文件，程序结束");
            return Ok(RunStats::default());
        }
        log_jobs_loaded(jobs.len());

        let token = self.cancellation_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⊘ 收到 Ctrl-C，当前阶段完成后停止");
                token.cancel();
            }
        });

        let stats = self.process_all_jobs(&jobs).await;
        watcher.abort();

        // 输出最终统计
        print_final_stats(
            &stats,
            &self.config.output_log_file,
            &self.config.manual_action_file,
        );
        Ok(stats)
    }

    /// 逐个处理所有任务
    async fn process_all_jobs(&self, jobs: &[ManifestJob]) -> RunStats {
        let token = self.cancellation_token();
        let mut stats = RunStats {
            total: jobs.len(),
            ..Default::default()
        };

        for (index, job) in jobs.iter().enumerate() {
            if token.is_cancelled() {
                let remaining = jobs.len() - index;
                warn!("⊘ 已取消，剩余 {} 个任务保留在队列中", remaining);
                stats.cancelled += remaining;
                break;
            }

            log_job_start(
                index + 1,
                jobs.len(),
                &job.reference,
                &job.manifest.display().to_string(),
            );

            match submission_processor::process_job(&self.engine, job, &self.config, &self.writer)
                .await
            {
                Ok(SubmissionStatus::Success) => stats.success += 1,
                Ok(SubmissionStatus::PartialSuccess) => stats.partial += 1,
                Ok(SubmissionStatus::Failed) => stats.failed += 1,
                Ok(SubmissionStatus::Cancelled) => stats.cancelled += 1,
                Err(e) => {
                    error!("[PO {}] ❌ 处理过程中发生错误: {:#}", job.reference, e);
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}
