//! 多策略等待
//!
//! 门户自身的就绪信号并不可靠：网络空闲可能永远不触发，元素也可能迟迟不出现。
//! 这里按顺序尝试多个互相独立的等待策略，任何一个满足即返回，每个策略都有上限。

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::infrastructure::{PortalSession, WaitCondition};

#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// 有界轮询一个条件
    Condition {
        condition: WaitCondition,
        timeout: Duration,
    },
    /// 固定等待，本身不算作信号
    Pause(Duration),
}

impl WaitStrategy {
    pub fn condition(condition: WaitCondition, timeout: Duration) -> Self {
        WaitStrategy::Condition { condition, timeout }
    }
}

/// 依次执行等待策略，返回第一个满足的策略序号；全部未满足返回 None
pub async fn settle(
    session: &mut dyn PortalSession,
    strategies: &[WaitStrategy],
    interval: Duration,
) -> Option<usize> {
    for (index, strategy) in strategies.iter().enumerate() {
        match strategy {
            WaitStrategy::Pause(duration) => {
                if !duration.is_zero() {
                    sleep(*duration).await;
                }
            }
            WaitStrategy::Condition { condition, timeout } => {
                if session.wait_for_condition(condition, *timeout, interval).await {
                    debug!("等待策略 {} 满足: {:?}", index + 1, condition);
                    return Some(index);
                }
                debug!("等待策略 {} 超时 ({}ms)", index + 1, timeout.as_millis());
            }
        }
    }
    None
}

/// 等待页面网络空闲，超时不视为错误
pub async fn settle_network(session: &mut dyn PortalSession, limit: Duration, interval: Duration) {
    settle(
        session,
        &[WaitStrategy::condition(WaitCondition::NetworkIdle, limit)],
        interval,
    )
    .await;
}
