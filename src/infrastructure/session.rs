//! 门户会话能力 - 基础设施层
//!
//! 流程层只依赖这里定义的能力接口，不接触任何具体的浏览器传输实现。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};

use crate::error::SessionResult;
use crate::models::{ListingEntry, Selector};

/// 页面等待条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// 文档加载完成且近期没有网络请求
    NetworkIdle,
    /// 任一候选元素可见
    AnyVisible(Vec<Selector>),
    /// 任一候选元素存在于文档中（可以是隐藏的，例如文件输入框）
    AnyPresent(Vec<Selector>),
    /// 当前 URL 不包含任何给定片段
    UrlExcludes(Vec<String>),
    /// 页面文本包含任一关键字（忽略大小写）
    TextPresent(Vec<String>),
}

/// 门户会话
///
/// 一个会话独占一个浏览器页面，由工作流在开始时打开、结束时关闭。
/// 所有方法都不应无限阻塞；引擎还会在外层为每次调用加超时。
#[async_trait]
pub trait PortalSession: Send {
    /// 导航到指定 URL
    async fn navigate(&mut self, url: &str) -> SessionResult<()>;

    /// 按顺序尝试候选选择器，点击第一个可见元素；都没找到返回 false
    async fn find_and_click(&mut self, candidates: &[Selector]) -> SessionResult<bool>;

    /// 填写第一个可见的输入框
    async fn fill(&mut self, candidates: &[Selector], value: &str) -> SessionResult<bool>;

    /// 给文件输入框设置文件
    async fn attach_file(&mut self, candidates: &[Selector], file: &Path) -> SessionResult<bool>;

    /// 立即检查一次条件，不等待
    async fn probe(&mut self, condition: &WaitCondition) -> SessionResult<bool>;

    /// 读取当前订单列表
    async fn list_entries(&mut self) -> SessionResult<Vec<ListingEntry>>;

    /// 勾选列表中的一行（已勾选视为成功）
    async fn select_entry(&mut self, entry: &ListingEntry) -> SessionResult<bool>;

    /// 点击触发控件并等待下载完成，文件保存到 `save_as`
    async fn download(
        &mut self,
        trigger: &[Selector],
        save_as: &Path,
        timeout: Duration,
    ) -> SessionResult<PathBuf>;

    /// 页面上可识别的错误提示文本
    async fn error_indicator(&mut self) -> SessionResult<Option<String>>;

    /// 关闭错误提示
    async fn dismiss_error_indicator(&mut self) -> SessionResult<bool>;

    /// 强制刷新当前页面
    async fn reload(&mut self) -> SessionResult<()>;

    /// 保存截图
    async fn screenshot(&mut self, path: &Path) -> SessionResult<PathBuf>;

    /// 关闭会话，释放浏览器资源
    async fn close(&mut self);

    /// 有界轮询：检查条件，间隔 `interval`，直到满足或超时
    ///
    /// 单次检查同样受剩余时间限制，页面冻结也不会让等待超过 `limit`。
    async fn wait_for_condition(
        &mut self,
        condition: &WaitCondition,
        limit: Duration,
        interval: Duration,
    ) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if let Ok(Ok(true)) = timeout(remaining, self.probe(condition)).await {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            sleep(interval.min(remaining)).await;
        }
    }
}

/// 会话工厂（openSession）
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self) -> SessionResult<Box<dyn PortalSession>>;
}
