//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责队列处理和结果处置，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量清单处理器
//! - 管理应用生命周期（初始化、运行）
//! - 装配会话工厂、门户阶段和打印链
//! - 逐个处理队列中的任务
//! - 输出全局统计信息
//!
//! ### `submission_processor` - 单个清单处理器
//! - 构建提交请求并交给阶段引擎
//! - 按结果归档任务或写入人工处理记录
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<ManifestJob>)
//!     ↓
//! submission_processor (处理单个 ManifestJob)
//!     ↓
//! workflow::StageEngine (驱动单个会话的阶段路线)
//!     ↓
//! services (能力层：订单选择 / 打印 / 人工处理记录)
//!     ↓
//! infrastructure (基础设施：PortalSession / JsExecutor)
//! ```

pub mod batch_processor;
pub mod submission_processor;

// 重新导出主要类型
pub use batch_processor::App;
pub use submission_processor::{apply_disposition, build_request, process_job};
