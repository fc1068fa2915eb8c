//! 订单列表条目

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::profile::ListingLayout;
use crate::models::submission::ServiceLevel;

/// 订单列表上的一行
///
/// 只在选择订单阶段存在，`handle` 用于再次定位该行。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub reference: String,
    pub service_level_label: String,
    pub handle: String,
    #[serde(default)]
    pub created: Option<NaiveDate>,
}

impl ListingEntry {
    pub fn new(
        reference: impl Into<String>,
        service_level_label: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            service_level_label: service_level_label.into(),
            handle: handle.into(),
            created: None,
        }
    }

    pub fn created_on(mut self, date: NaiveDate) -> Self {
        self.created = Some(date);
        self
    }

    pub fn service_level(&self) -> Option<ServiceLevel> {
        ServiceLevel::from_label(&self.service_level_label)
    }
}

/// 页面脚本返回的原始行数据
#[derive(Debug, Clone, Deserialize)]
pub struct ListingRow {
    pub handle: String,
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub text: String,
}

impl ListingRow {
    /// 按表格布局把原始行转换成列表条目；表头或空行返回 None
    pub fn into_entry(self, layout: &ListingLayout) -> Option<ListingEntry> {
        let reference = self
            .cells
            .get(layout.reference_column)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())?;

        let service_level_label = match layout.service_level_column {
            Some(col) => self.cells.get(col).cloned().unwrap_or_default(),
            None => self.text.clone(),
        };

        let created = parse_listing_date(&self.text, &layout.date_format);

        Some(ListingEntry {
            reference,
            service_level_label: service_level_label.trim().to_string(),
            handle: self.handle,
            created,
        })
    }
}

/// 从行文本中找出第一个符合格式的日期
fn parse_listing_date(text: &str, format: &str) -> Option<NaiveDate> {
    let re = Regex::new(r"\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}").ok()?;
    let found = re
        .find_iter(text)
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), format).ok());
    found
}
