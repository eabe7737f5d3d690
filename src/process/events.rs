//! 服务器进程事件
//!
//! 输出行、状态变化等都推入通道，由 CLI / UI 单线程消费

use super::state::{StopMode, SupervisorState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// 输出来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    StateChanged {
        state: SupervisorState,
    },
    /// 控制台输出（尽力而为的日志流，不是命令应答）
    Output {
        stream: OutputStream,
        line: String,
    },
    /// 进程退出；`requested` 为 false 表示崩溃或外部终止
    Exited {
        pid: u32,
        code: Option<i32>,
        requested: bool,
    },
    /// 重新连接到上次留下的服务器，控制台不可用
    Reattached {
        pid: u32,
        started_at: DateTime<Utc>,
        jar_file: String,
        warning: String,
    },
    /// 即将强制终止（重新连接的进程没有正常停止路径）
    ForceKillPending {
        pid: u32,
        mode: StopMode,
        reason: String,
    },
    CommandSent {
        command: String,
    },
}

pub type ServerEventSender = UnboundedSender<ServerEvent>;
pub type ServerEventReceiver = UnboundedReceiver<ServerEvent>;

/// 创建服务器事件通道
pub fn server_event_channel() -> (ServerEventSender, ServerEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
