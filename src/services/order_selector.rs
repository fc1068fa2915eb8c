//! 订单选择服务 - 业务能力层
//!
//! 只负责"从订单列表中挑出属于本次提交的条目"，不点击、不导航。

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ListingEntry, ServiceLevel};

/// 同一次上传最多对应的订单数（一个 Standard + 一个 Premium）
pub const MAX_SELECTIONS: usize = 2;

/// PO 号匹配规则
///
/// 门户是否区分大小写没有定论，所以做成可配置项，默认严格相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub case_sensitive: bool,
    pub trim_whitespace: bool,
    /// 允许列表上的 PO 号包含请求的 PO 号
    pub allow_partial: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            trim_whitespace: false,
            allow_partial: false,
        }
    }
}

impl MatchPolicy {
    pub fn matches(&self, listed: &str, reference: &str) -> bool {
        let (listed, reference) = if self.trim_whitespace {
            (listed.trim(), reference.trim())
        } else {
            (listed, reference)
        };
        if reference.is_empty() {
            return false;
        }

        if self.case_sensitive {
            if self.allow_partial {
                listed.contains(reference)
            } else {
                listed == reference
            }
        } else {
            let listed = listed.to_lowercase();
            let reference = reference.to_lowercase();
            if self.allow_partial {
                listed.contains(&reference)
            } else {
                listed == reference
            }
        }
    }
}

/// 选择失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// 列表上没有该 PO 的条目（列表可能还没刷新）
    #[error("列表中没有 PO {reference} 的订单 (共 {listed} 行)")]
    NoMatch { reference: String, listed: usize },
    /// 有该 PO 的条目，但服务等级都不是期望的
    #[error("PO {reference} 的 {matched} 条订单都不属于期望的服务等级")]
    NoExpectedLevel { reference: String, matched: usize },
}

/// 选择结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// 需要勾选的条目，按列表顺序
    pub chosen: Vec<ListingEntry>,
    /// PO 匹配的条目总数
    pub matched: usize,
    /// 期望但未出现的服务等级
    pub missing_levels: Vec<ServiceLevel>,
    /// 附加说明（写入阶段结果）
    pub note: Option<String>,
}

impl Selection {
    pub fn detail(&self) -> String {
        let mut detail = format!("已选择 {} 条订单 (匹配 {} 条)", self.chosen.len(), self.matched);
        if !self.missing_levels.is_empty() {
            let missing: Vec<String> = self.missing_levels.iter().map(|l| l.to_string()).collect();
            detail.push_str(&format!("，缺少服务等级: {}", missing.join(", ")));
        }
        if let Some(note) = &self.note {
            detail.push_str(&format!("，{}", note));
        }
        detail
    }
}

/// 订单选择服务
#[derive(Debug, Clone)]
pub struct OrderSelector {
    policy: MatchPolicy,
    max_selections: usize,
    preferred_date: Option<NaiveDate>,
}

impl Default for OrderSelector {
    fn default() -> Self {
        Self::new(MatchPolicy::default())
    }
}

impl OrderSelector {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            max_selections: MAX_SELECTIONS,
            preferred_date: None,
        }
    }

    /// 优先选择指定日期（通常是今天）创建的订单
    pub fn prefer_date(mut self, date: NaiveDate) -> Self {
        self.preferred_date = Some(date);
        self
    }

    /// 从列表中挑出属于本次提交的条目
    ///
    /// 列表按新到旧排列。每个期望的服务等级最多选一条（取最靠前的），总数不超过
    /// [`MAX_SELECTIONS`]。期望集合为空时视为接受所有服务等级。
    pub fn select(
        &self,
        entries: &[ListingEntry],
        reference: &str,
        expected: &BTreeSet<ServiceLevel>,
    ) -> Result<Selection, SelectionError> {
        let matched: Vec<&ListingEntry> = entries
            .iter()
            .filter(|e| self.policy.matches(&e.reference, reference))
            .collect();

        if matched.is_empty() {
            return Err(SelectionError::NoMatch {
                reference: reference.to_string(),
                listed: entries.len(),
            });
        }

        let mut note = None;
        let pool: Vec<&ListingEntry> = match self.preferred_date {
            Some(date) => {
                let dated: Vec<&ListingEntry> = matched
                    .iter()
                    .copied()
                    .filter(|e| e.created == Some(date))
                    .collect();
                if dated.is_empty() {
                    note = Some(format!("没有 {} 创建的订单，已忽略日期过滤", date));
                    matched.clone()
                } else {
                    dated
                }
            }
            None => matched.clone(),
        };

        let expected: BTreeSet<ServiceLevel> = if expected.is_empty() {
            ServiceLevel::ALL.into_iter().collect()
        } else {
            expected.clone()
        };
        let cap = self.max_selections.min(expected.len());

        let mut taken = BTreeSet::new();
        let mut chosen = Vec::new();
        for entry in &pool {
            if chosen.len() >= cap {
                break;
            }
            if let Some(level) = entry.service_level() {
                if expected.contains(&level) && taken.insert(level) {
                    chosen.push((*entry).clone());
                }
            }
        }

        // 门户上的服务等级文本无法识别时，按列表顺序取最新的几条
        if chosen.is_empty() {
            let unlabelled: Vec<&ListingEntry> = pool
                .iter()
                .copied()
                .filter(|e| e.service_level().is_none())
                .take(cap)
                .collect();
            if unlabelled.is_empty() {
                return Err(SelectionError::NoExpectedLevel {
                    reference: reference.to_string(),
                    matched: matched.len(),
                });
            }
            note = Some("服务等级无法识别，按列表顺序选择".to_string());
            chosen = unlabelled.into_iter().cloned().collect();
        }

        let missing_levels = expected
            .iter()
            .copied()
            .filter(|level| !taken.contains(level))
            .collect();

        Ok(Selection {
            chosen,
            matched: matched.len(),
            missing_levels,
            note,
        })
    }
}
