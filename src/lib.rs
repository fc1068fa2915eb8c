//! # Manifest Portal Submit
//!
//! 把承运商清单文件提交到没有正式 API 的门户，下载确认单并打印
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 会话能力接口 `PortalSession` / `SessionFactory`
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//! - `browser/` - 基于 chromiumoxide 的会话实现（连接或启动浏览器）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流程
//! - `OrderSelector` - 从订单列表中挑出本次提交的订单
//! - `PrinterChain` - 按优先级尝试多个打印后端
//! - `ManualActionWriter` - 写人工处理记录
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次提交"的阶段路线
//! - `Stage` - 阶段与替代边（ViewOrders → OrderConfirmationFallback）
//! - `StageEngine` - 阶段内重试、整体重试、智能重启、错误恢复
//! - `SubmissionResult` - 唯一的输出，带阶段轨迹和诊断截图
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 队列处理器，逐个提交
//! - `orchestrator/submission_processor` - 单个任务的提交与结果处置
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{ChromeSession, ChromeSessionFactory};
pub use config::{Config, Credentials, EngineConfig};
pub use error::{AppError, AppResult, FailureKind, SessionError, StageFailure};
pub use infrastructure::{JsExecutor, PortalSession, SessionFactory, WaitCondition};
pub use models::{ListingEntry, ManifestJob, PortalProfile, Selector, ServiceLevel, SubmissionRequest};
pub use orchestrator::App;
pub use services::{MatchPolicy, OrderSelector, Selection};
pub use workflow::{
    Disposition, PortalSteps, Stage, StageEngine, StageOutcome, StageStatus, SubmissionResult,
    SubmissionStatus,
};
