//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 debug 或 info。
/// 重复调用（例如多个测试）不会报错。
pub fn init(verbose: bool) {
    let default = if verbose {
        "manifest_portal_submit=debug,chromiumoxide=warn"
    } else {
        "manifest_portal_submit=info,chromiumoxide=warn"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n门户提交日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(portal: &str, overall_retries: u32, stage_retries: u32, auto_print: bool) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {} 清单提交", portal);
    info!("🔁 整体重试 {} 次 / 阶段重试 {} 次", overall_retries, stage_retries);
    info!("🖨️ 自动打印: {}", if auto_print { "开启" } else { "关闭" });
    info!("{}", "=".repeat(60));
}

/// 记录任务加载信息
pub fn log_jobs_loaded(total: usize) {
    info!("✓ 找到 {} 个待提交的清单", total);
    info!("📋 将逐个提交（同一时间只使用一个浏览器会话）\n");
}

/// 记录单个任务开始
pub fn log_job_start(index: usize, total: usize, reference: &str, manifest: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📦 [{}/{}] PO {} - {}", index, total, reference, manifest);
    info!("{}", "─".repeat(60));
}

/// 批量处理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 统计数据
/// - `log_file_path`: 日志文件路径
/// - `manual_action_file`: 人工处理记录文件
pub fn print_final_stats(stats: &RunStats, log_file_path: &str, manual_action_file: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", stats.success, stats.total);
    info!("⚠️ 部分成功 (需手动打印): {}", stats.partial);
    info!("❌ 失败: {}", stats.failed);
    if stats.cancelled > 0 {
        info!("⊘ 取消: {}", stats.cancelled);
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
    if stats.partial + stats.failed > 0 {
        info!("需要人工处理的记录: {}", manual_action_file);
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
