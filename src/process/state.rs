use serde::{Deserialize, Serialize};
use std::fmt;

/// 运行中进程的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 本次启动的子进程，持有 stdin/stdout
    Owned,
    /// 通过状态文件重新连接的进程，只能查询存活和强制终止
    Reconnected,
}

/// 进程管理器状态
///
/// `Stopped → Starting → Running → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running { pid: u32, mode: RunMode },
    Stopping,
}

impl SupervisorState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Running { pid, .. } => Some(*pid),
            _ => None,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "已停止"),
            Self::Starting => write!(f, "启动中"),
            Self::Running {
                pid,
                mode: RunMode::Owned,
            } => write!(f, "运行中 (pid={})", pid),
            Self::Running {
                pid,
                mode: RunMode::Reconnected,
            } => write!(f, "运行中 (pid={}, 重新连接，无控制台)", pid),
            Self::Stopping => write!(f, "停止中"),
        }
    }
}

/// `stop()` 将采用的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// 发送 `stop` 并等待退出，超时后强制终止
    Graceful,
    /// 直接强制终止（会丢失未保存的世界数据）
    ForceKill,
}

/// `stop()` 的实际结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Graceful,
    KilledAfterTimeout,
    ForceKilled,
}

/// 宿主退出时对运行中服务器的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitChoice {
    /// 正常停止服务器后退出
    StopAndExit,
    /// 服务器保持运行，保留状态文件供下次重新连接
    LeaveRunning,
    /// 取消退出
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        let state = SupervisorState::Running {
            pid: 42,
            mode: RunMode::Reconnected,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"state":"running","pid":42,"mode":"reconnected"}"#);
        assert_eq!(state.pid(), Some(42));
        assert!(!SupervisorState::Stopping.is_running());
    }
}
