//! 门户页面描述
//!
//! 目标门户没有正式 API，页面结构也不稳定。所有选择器、URL 和关键字表都集中在这里，
//! 默认值对应 Spring GDS 门户，可以用 TOML 文件覆盖。

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 候选选择器
///
/// `css` 是标准 CSS 选择器；`text` 不为空时，元素的可见文本还必须包含该文本（忽略大小写）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub css: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
        }
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: Some(text.into()),
        }
    }

    /// 是否包含指定文本（用于测试替身按文本识别控件）
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.text
            .as_deref()
            .map(|t| t.to_lowercase().contains(&needle))
            .unwrap_or(false)
            || self.css.to_lowercase().contains(&needle)
    }
}

/// 订单列表的表格布局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingLayout {
    /// 行选择器
    pub row_css: String,
    /// 行内复选框选择器
    pub checkbox_css: String,
    /// PO 号所在列（从 0 开始）
    pub reference_column: usize,
    /// 服务等级所在列；为空时在整行文本中识别
    pub service_level_column: Option<usize>,
    /// 列表上的日期格式（chrono 格式）
    pub date_format: String,
}

impl Default for ListingLayout {
    fn default() -> Self {
        Self {
            row_css: "tr, [role=\"row\"]".to_string(),
            checkbox_css: "input[type=\"checkbox\"], [role=\"checkbox\"]".to_string(),
            reference_column: 1,
            service_level_column: None,
            date_format: "%d-%m-%Y".to_string(),
        }
    }
}

/// 门户页面描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalProfile {
    /// 门户名称（仅用于日志）
    pub name: String,
    /// 登录页
    pub login_url: String,
    /// 下载文件名前缀
    pub document_prefix: String,

    // --- 登录 ---
    pub email_fields: Vec<Selector>,
    pub next_buttons: Vec<Selector>,
    pub password_fields: Vec<Selector>,
    pub sign_in_buttons: Vec<Selector>,
    /// 登录成功后才会出现的元素
    pub dashboard_indicators: Vec<Selector>,
    /// 仍停留在登录页时 URL 中包含的片段
    pub login_url_markers: Vec<String>,
    /// 登录被拒时页面上出现的文本
    pub login_rejected_keywords: Vec<String>,

    // --- 上传 ---
    pub upload_links: Vec<Selector>,
    pub file_inputs: Vec<Selector>,
    pub upload_success_indicators: Vec<Selector>,

    // --- 订单列表 ---
    pub view_orders_buttons: Vec<Selector>,
    pub order_confirmation_links: Vec<Selector>,
    pub listing_ready_indicators: Vec<Selector>,
    pub listing: ListingLayout,

    // --- 下载 ---
    pub print_buttons: Vec<Selector>,

    // --- 页内错误 ---
    pub error_indicators: Vec<Selector>,
    pub error_keywords: Vec<String>,
    pub error_close_buttons: Vec<Selector>,
}

fn texts(css: &str, labels: &[&str]) -> Vec<Selector> {
    labels.iter().map(|l| Selector::with_text(css, *l)).collect()
}

fn csss(items: &[&str]) -> Vec<Selector> {
    items.iter().map(|c| Selector::css(*c)).collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PortalProfile {
    fn default() -> Self {
        let mut upload_links = texts(
            "a, button",
            &[
                "Upload Multiple Orders",
                "Upload Multiple",
                "Multiple Orders",
                "Upload Orders",
                "Bulk Upload",
                "Import Orders",
            ],
        );
        upload_links.extend(csss(&[
            "[href*=\"upload\"]",
            "[href*=\"Upload\"]",
            "[href*=\"multiple\"]",
            "[href*=\"bulk\"]",
        ]));

        let mut order_confirmation_links = texts(
            "a, nav a, .sidebar a, .menu a",
            &["Order confirmation"],
        );
        order_confirmation_links.extend(csss(&["[href*=\"confirmation\"]", "[href*=\"confirm\"]"]));

        let mut print_buttons = texts("button, a", &["Print", "Download"]);
        print_buttons.extend(csss(&["[title=\"Print\"]", "[title=\"Download\"]"]));

        Self {
            name: "Spring GDS".to_string(),
            login_url: "https://my.spring-gds.com/".to_string(),
            document_prefix: "Spring".to_string(),

            email_fields: csss(&[
                "input[type=\"email\"]",
                "input[name=\"email\"]",
                "input[placeholder*=\"mail\"]",
                "input[id*=\"email\"]",
            ]),
            next_buttons: {
                let mut v = texts("button", &["Next", "Continue"]);
                v.push(Selector::css("button[type=\"submit\"]"));
                v
            },
            password_fields: csss(&["input[type=\"password\"]"]),
            sign_in_buttons: {
                let mut v = texts("button", &["Sign in", "Login"]);
                v.push(Selector::css("button[type=\"submit\"]"));
                v
            },
            dashboard_indicators: {
                let mut v = texts("a, button, h1, h2, span", &[
                    "Upload Multiple Orders",
                    "Dashboard",
                    "My Orders",
                    "Welcome",
                ]);
                v.extend(csss(&["[href*=\"upload\"]", "[href*=\"order\"]"]));
                v
            },
            login_url_markers: strings(&["login", "signin"]),
            login_rejected_keywords: strings(&[
                "incorrect password",
                "invalid credentials",
                "invalid email or password",
                "wrong password",
                "account is locked",
            ]),

            upload_links,
            file_inputs: csss(&["input[type=\"file\"]"]),
            upload_success_indicators: {
                let mut v = texts("a, button, div, span", &[
                    "View uploaded orders",
                    "Upload successful",
                    "Orders uploaded",
                ]);
                v.extend(csss(&[".success", ".alert-success"]));
                v
            },

            view_orders_buttons: texts(
                "button, a",
                &["View uploaded orders", "View orders", "Continue"],
            ),
            order_confirmation_links,
            listing_ready_indicators: csss(&[
                "table tr",
                "[role=\"row\"]",
                "input[type=\"checkbox\"]",
            ]),
            listing: ListingLayout::default(),

            print_buttons,

            error_indicators: csss(&[
                ".error-message",
                ".alert-danger",
                ".notification-error",
                "[class*=\"error\"]",
                "[role=\"alert\"]",
            ]),
            error_keywords: strings(&[
                "unexpected error",
                "something went wrong",
                "please try again",
                "error occurred",
                "unable to process",
                "server error",
            ]),
            error_close_buttons: {
                let mut v = texts(".modal button", &["×", "X"]);
                v.extend(csss(&[
                    "[aria-label=\"Close\"]",
                    "[aria-label=\"close\"]",
                    "button[class*=\"close\"]",
                    "[class*=\"close\"]",
                    ".error button",
                ]));
                v
            },
        }
    }
}

impl PortalProfile {
    /// 从 TOML 文件加载门户描述，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取门户描述文件: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("无法解析门户描述文件: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
