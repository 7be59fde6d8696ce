//! 连接状态观察
//!
//! 定期 ping，只在状态变化时记录日志。

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tessera_errors::AppResult;
use tessera_ports::ManagedConnection;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 默认检查间隔
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Pending,
    Failing,
    Connected,
    Disconnected,
}

/// 连接状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// 首次连通
    Connected,
    /// 连通后断开
    Disconnected,
    /// 断开后恢复
    Reconnected,
    /// 从未连通过且检查失败
    Error,
}

impl ConnectionTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnected => "reconnected",
            Self::Error => "error",
        }
    }
}

pub struct ConnectionMonitor {
    connection: Arc<dyn ManagedConnection>,
    interval: Duration,
    state: ProbeState,
}

impl ConnectionMonitor {
    pub fn new(connection: Arc<dyn ManagedConnection>, interval: Duration) -> Self {
        Self {
            connection,
            interval,
            state: ProbeState::Pending,
        }
    }

    /// 根据一次检查结果推进状态
    pub fn observe(&mut self, result: &AppResult<()>) -> Option<ConnectionTransition> {
        let name = self.connection.name();
        let (next, transition) = match (self.state, result) {
            (ProbeState::Pending | ProbeState::Failing, Ok(())) => {
                (ProbeState::Connected, Some(ConnectionTransition::Connected))
            }
            (ProbeState::Pending, Err(_)) => (ProbeState::Failing, Some(ConnectionTransition::Error)),
            (ProbeState::Connected, Err(_)) => {
                (ProbeState::Disconnected, Some(ConnectionTransition::Disconnected))
            }
            (ProbeState::Disconnected, Ok(())) => {
                (ProbeState::Connected, Some(ConnectionTransition::Reconnected))
            }
            (state, _) => (state, None),
        };
        self.state = next;

        match (transition, result) {
            (Some(ConnectionTransition::Connected), _) => info!(connection = name, "Connection connected"),
            (Some(ConnectionTransition::Reconnected), _) => info!(connection = name, "Connection reconnected"),
            (Some(ConnectionTransition::Disconnected), Err(e)) => {
                warn!(connection = name, error = %e, "Connection disconnected")
            }
            (Some(ConnectionTransition::Error), Err(e)) => {
                error!(connection = name, error = %e, "Connection error")
            }
            _ => {}
        }
        if let Some(transition) = transition {
            counter!(
                "connection_transitions_total",
                "connection" => name.to_string(),
                "transition" => transition.as_str()
            )
            .increment(1);
        }

        transition
    }

    pub async fn check(&mut self) -> Option<ConnectionTransition> {
        let result = self.connection.ping().await;
        self.observe(&result)
    }

    /// 后台循环，连接关闭后退出
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if self.connection.is_closed() {
                    debug!(connection = self.connection.name(), "Connection closed, monitor stopped");
                    break;
                }
                self.check().await;
            }
        })
    }
}
