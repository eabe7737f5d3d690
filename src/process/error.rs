// 服务器进程管理错误类型定义

use super::state::SupervisorState;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 进程管理错误
#[derive(Debug, Error)]
pub enum ProcessError {
    /// 启动失败（Java 未安装、jar 不存在、工作目录无效）
    #[error("启动服务器失败（{program}）: {source}，请确认 Java 已安装且 jar 文件存在")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// 当前状态不允许该操作
    #[error("服务器当前状态为 {state}，无法执行 {operation}")]
    InvalidState {
        state: SupervisorState,
        operation: &'static str,
    },

    /// 没有正在运行的服务器
    #[error("服务器未在运行")]
    NotRunning,

    /// 写命令前发现进程已退出
    #[error("服务器进程 (pid={pid}) 已退出，命令未发送")]
    WriteAfterDeath { pid: u32 },

    /// 重新连接的进程没有 stdin
    #[error("服务器进程 (pid={pid}) 是重新连接的进程，没有命令通道；停止后重新启动服务器即可恢复控制台")]
    CommandUnavailable { pid: u32 },

    /// 写入 stdin 失败
    #[error("向服务器写入命令失败: {source}")]
    CommandWrite {
        #[source]
        source: io::Error,
    },

    /// 强制终止失败
    #[error("终止服务器进程 (pid={pid}) 失败: {reason}")]
    Kill { pid: u32, reason: String },

    /// 状态文件损坏，按"没有运行中的进程"处理
    #[error("状态文件 {path:?} 已损坏，按无运行中的服务器处理: {reason}")]
    Reattach { path: PathBuf, reason: String },

    /// 状态文件读写失败
    #[error("读写状态文件 {path:?} 失败: {source}")]
    StatusStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
