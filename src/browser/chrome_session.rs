//! Chrome 门户会话
//!
//! 基于 chromiumoxide 的 [`PortalSession`] 实现，每个会话独占一个页面。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Browser;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{connect_to_browser, launch_browser, scripts};
use crate::config::BrowserSettings;
use crate::error::{SessionError, SessionResult};
use crate::infrastructure::{JsExecutor, PortalSession, SessionFactory, WaitCondition};
use crate::models::{ListingEntry, ListingRow, PortalProfile, Selector};

pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    executor: JsExecutor,
    profile: Arc<PortalProfile>,
    download_dir: PathBuf,
    poll_interval: Duration,
    /// 自行启动的浏览器在关闭会话时一并退出；连接的浏览器只关闭页面
    owns_browser: bool,
}

impl ChromeSession {
    /// 允许下载到会话的下载目录，然后进入登录页
    async fn prepare(&mut self, login_url: &str) -> SessionResult<()> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.to_string_lossy().to_string())
            .build()
            .map_err(SessionError::Script)?;
        self.browser.execute(params).await?;
        debug!("下载目录: {}", self.download_dir.display());

        self.navigate(login_url).await
    }

    async fn downloaded_files(&self) -> SessionResult<HashSet<PathBuf>> {
        let mut files = HashSet::new();
        let mut dir = tokio::fs::read_dir(&self.download_dir)
            .await
            .map_err(|e| SessionError::io(&self.download_dir, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| SessionError::io(&self.download_dir, e))?
        {
            files.insert(entry.path());
        }
        Ok(files)
    }

    /// 下载目录里新出现的、已完成的文件
    async fn completed_download(&self, before: &HashSet<PathBuf>) -> SessionResult<Option<PathBuf>> {
        let now = self.downloaded_files().await?;
        Ok(now.into_iter().find(|p| {
            let partial = p
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("crdownload") || e.eq_ignore_ascii_case("tmp"))
                .unwrap_or(false);
            !partial && !before.contains(p)
        }))
    }
}

async fn move_file(from: &Path, to: &Path) -> SessionResult<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SessionError::io(parent, e))?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // 跨盘符时 rename 会失败
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| SessionError::io(to, e))?;
    if let Err(e) = tokio::fs::remove_file(from).await {
        warn!("⚠️ 无法删除临时下载文件 {}: {}", from.display(), e);
    }
    Ok(())
}

#[async_trait]
impl PortalSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        debug!("导航到 {}", url);
        match self.executor.page().goto(url).await {
            Ok(_) => Ok(()),
            Err(e) => match SessionError::from(e) {
                err @ SessionError::Disconnected(_) => Err(err),
                other => Err(SessionError::NavigationFailed {
                    url: url.to_string(),
                    message: other.to_string(),
                }),
            },
        }
    }

    async fn find_and_click(&mut self, candidates: &[Selector]) -> SessionResult<bool> {
        self.executor.eval_bool(scripts::click_first(candidates)?).await
    }

    async fn fill(&mut self, candidates: &[Selector], value: &str) -> SessionResult<bool> {
        self.executor.eval_bool(scripts::fill_first(candidates, value)?).await
    }

    async fn attach_file(&mut self, candidates: &[Selector], file: &Path) -> SessionResult<bool> {
        if !file.exists() {
            return Err(SessionError::io(
                file,
                std::io::Error::new(std::io::ErrorKind::NotFound, "清单文件不存在"),
            ));
        }
        if !self.executor.eval_bool(scripts::mark_file_input(candidates)?).await? {
            return Ok(false);
        }

        let input = self
            .executor
            .page()
            .find_element(scripts::FILE_INPUT_MARKER)
            .await?;
        let mut params = SetFileInputFilesParams::new(vec![file.to_string_lossy().to_string()]);
        params.backend_node_id = Some(input.backend_node_id);
        self.executor.page().execute(params).await?;
        debug!("已设置上传文件: {}", file.display());
        Ok(true)
    }

    async fn probe(&mut self, condition: &WaitCondition) -> SessionResult<bool> {
        match condition {
            WaitCondition::NetworkIdle => self.executor.eval_bool(scripts::network_idle()).await,
            WaitCondition::AnyVisible(candidates) => {
                self.executor.eval_bool(scripts::any_visible(candidates)?).await
            }
            WaitCondition::AnyPresent(candidates) => {
                self.executor.eval_bool(scripts::any_present(candidates)?).await
            }
            WaitCondition::UrlExcludes(markers) => {
                let url = self
                    .executor
                    .page()
                    .url()
                    .await?
                    .unwrap_or_default()
                    .to_lowercase();
                Ok(!markers.iter().any(|m| url.contains(&m.to_lowercase())))
            }
            WaitCondition::TextPresent(keywords) => {
                self.executor.eval_bool(scripts::text_present(keywords)?).await
            }
        }
    }

    async fn list_entries(&mut self) -> SessionResult<Vec<ListingEntry>> {
        let layout = &self.profile.listing;
        let rows: Vec<ListingRow> = self.executor.eval_as(scripts::list_rows(layout)?).await?;
        let total = rows.len();
        let entries: Vec<ListingEntry> = rows
            .into_iter()
            .filter_map(|row| row.into_entry(layout))
            .collect();
        debug!("列表共 {} 行，有效条目 {} 条", total, entries.len());
        Ok(entries)
    }

    async fn select_entry(&mut self, entry: &ListingEntry) -> SessionResult<bool> {
        self.executor
            .eval_bool(scripts::select_row(&entry.handle, &self.profile.listing.checkbox_css)?)
            .await
    }

    async fn download(
        &mut self,
        trigger: &[Selector],
        save_as: &Path,
        limit: Duration,
    ) -> SessionResult<PathBuf> {
        let before = self.downloaded_files().await?;
        if !self.find_and_click(trigger).await? {
            return Err(SessionError::not_found("打印/下载按钮"));
        }

        let deadline = Instant::now() + limit;
        loop {
            if let Some(path) = self.completed_download(&before).await? {
                move_file(&path, save_as).await?;
                info!("📄 已下载: {}", save_as.display());
                return Ok(save_as.to_path_buf());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    what: "文件下载".to_string(),
                    timeout_ms: limit.as_millis() as u64,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn error_indicator(&mut self) -> SessionResult<Option<String>> {
        let value = self
            .executor
            .eval(scripts::detect_error(
                &self.profile.error_indicators,
                &self.profile.error_keywords,
            )?)
            .await?;
        Ok(value
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    async fn dismiss_error_indicator(&mut self) -> SessionResult<bool> {
        self.executor
            .eval_bool(scripts::dismiss_error(&self.profile.error_close_buttons)?)
            .await
    }

    async fn reload(&mut self) -> SessionResult<()> {
        let reloaded = self.executor.page().reload().await.map(|_| ());
        match reloaded {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("⚠️ 页面刷新失败，改为重新导航: {}", e);
                match self.executor.page().url().await? {
                    Some(url) => self.navigate(&url).await,
                    None => Err(e.into()),
                }
            }
        }
    }

    async fn screenshot(&mut self, path: &Path) -> SessionResult<PathBuf> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::io(parent, e))?;
        }
        self.executor
            .page()
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await?;
        Ok(path.to_path_buf())
    }

    async fn close(&mut self) {
        if self.owns_browser {
            if let Err(e) = self.browser.close().await {
                warn!("⚠️ 关闭浏览器失败: {}", e);
            }
            let _ = self.browser.wait().await;
        } else if let Err(e) = self.executor.page().clone().close().await {
            warn!("⚠️ 关闭页面失败: {}", e);
        }
        self.handler.abort();
        debug!("会话已关闭");
    }
}

/// Chrome 会话工厂
///
/// 配置了调试端口时连接已有浏览器，否则自行启动。每次打开会话都会新建页面并进入登录页。
pub struct ChromeSessionFactory {
    settings: BrowserSettings,
    profile: Arc<PortalProfile>,
    download_dir: PathBuf,
    poll_interval: Duration,
}

impl ChromeSessionFactory {
    pub fn new(
        settings: BrowserSettings,
        profile: Arc<PortalProfile>,
        download_dir: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            settings,
            profile,
            download_dir: download_dir.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open_session(&self) -> SessionResult<Box<dyn PortalSession>> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| SessionError::io(&self.download_dir, e))?;
        let download_dir = tokio::fs::canonicalize(&self.download_dir)
            .await
            .unwrap_or_else(|_| self.download_dir.clone());

        let (mut browser, handler, owns_browser) = match self.settings.debug_port {
            Some(port) => {
                let (browser, handler) = connect_to_browser(port).await?;
                (browser, handler, false)
            }
            None => {
                let (browser, handler) = launch_browser(&self.settings).await?;
                (browser, handler, true)
            }
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if owns_browser {
                    let _ = browser.close().await;
                }
                handler.abort();
                return Err(e.into());
            }
        };

        let mut session = ChromeSession {
            browser,
            handler,
            executor: JsExecutor::new(page),
            profile: Arc::clone(&self.profile),
            download_dir,
            poll_interval: self.poll_interval,
            owns_browser,
        };

        if let Err(e) = session.prepare(&self.profile.login_url).await {
            session.close().await;
            return Err(e);
        }
        info!("🌐 已打开 {} 登录页", self.profile.name);
        Ok(Box::new(session))
    }
}
