//! 服务器进程句柄
//!
//! 同一个 trait 两种实现：
//! - `OwnedProcess`: 本次拉起的子进程，持有 stdin，可发送命令
//! - `ReconnectedProcess`: 只有 PID，只能查询存活和强制终止，发送命令返回 `CommandUnavailable`

use super::error::{ProcessError, ProcessResult};
use super::launch::LaunchSpec;
use super::status_store::StatusRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// 状态文件时间与 OS 报告的进程启动时间允许的最大偏差，超过视为 PID 被复用
pub const PID_REUSE_TOLERANCE_SECS: i64 = 120;

/// 轮询重新连接进程的间隔（等待退出时）
const RECONNECTED_WAIT_POLL: Duration = Duration::from_millis(200);

/// 非阻塞存活检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPoll {
    Running,
    /// 退出码；被信号杀死或无法获取时为 None
    Exited(Option<i32>),
}

impl ProcessPoll {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => *code,
            Self::Running => None,
        }
    }
}

/// 服务器进程接口
#[async_trait]
pub trait ServerProcess: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> u32;

    /// 非阻塞存活检查
    fn poll(&self) -> ProcessPoll;

    fn is_alive(&self) -> bool {
        self.poll().is_running()
    }

    /// 写入一行命令（自动追加换行并 flush）
    async fn try_send_command(&self, command: &str) -> ProcessResult<()>;

    /// 强制终止
    async fn kill(&self) -> ProcessResult<()>;

    /// 最多等待 `timeout`，超时返回 `ProcessPoll::Running`
    async fn wait(&self, timeout: Duration) -> ProcessPoll;
}

type KillReply = oneshot::Sender<io::Result<()>>;

/// 本次拉起的子进程
///
/// `Child` 由后台回收任务独占：它等待退出并把退出码发布到 watch 通道，
/// 同时响应 kill 请求。stdin 用异步锁保护"写入 + flush"
#[derive(Debug)]
pub struct OwnedProcess {
    pid: u32,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    kill_tx: mpsc::UnboundedSender<KillReply>,
}

/// 子进程的输出管道，交给输出读取任务
#[derive(Debug)]
pub struct OutputPipes {
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

enum ReaperSignal {
    Exited(io::Result<ExitStatus>),
    Kill(Option<KillReply>),
}

impl OwnedProcess {
    /// 启动子进程
    pub fn spawn(spec: &LaunchSpec) -> ProcessResult<(Self, OutputPipes)> {
        let program = spec.program.display().to_string();

        if let Some(required) = &spec.required_file {
            if !required.is_file() {
                return Err(ProcessError::Spawn {
                    program,
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("文件不存在: {}", required.display()),
                    ),
                });
            }
        }

        info!("启动服务器: {} (cwd={:?})", spec.command_line(), spec.working_dir);
        let mut child = spec
            .command()
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: program.clone(), source })?;

        let pid = child.id().ok_or_else(|| ProcessError::Spawn {
            program,
            source: io::Error::new(io::ErrorKind::Other, "子进程启动后立即退出"),
        })?;

        let pipes = OutputPipes {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        let stdin = child.stdin.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(reap(pid, child, exit_tx, kill_rx));

        Ok((
            Self {
                pid,
                stdin: tokio::sync::Mutex::new(stdin),
                exit_rx,
                kill_tx,
            },
            pipes,
        ))
    }

    /// 等待进程退出（无超时）
    pub async fn wait_exit(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        let status: Option<Option<i32>> = match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => *status,
            // 回收任务已结束，最后的值就是退出状态
            Err(_) => *self.exit_rx.borrow(),
        };
        status.flatten()
    }
}

/// 回收任务：独占 Child，等待退出或执行 kill
async fn reap(
    pid: u32,
    mut child: Child,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    mut kill_rx: mpsc::UnboundedReceiver<KillReply>,
) {
    let mut handle_open = true;
    loop {
        let signal = if handle_open {
            tokio::select! {
                status = child.wait() => ReaperSignal::Exited(status),
                reply = kill_rx.recv() => ReaperSignal::Kill(reply),
            }
        } else {
            ReaperSignal::Exited(child.wait().await)
        };

        match signal {
            ReaperSignal::Exited(status) => {
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!("等待服务器进程退出失败: pid={}, error={}", pid, e);
                        None
                    }
                };
                debug!("服务器进程已退出: pid={}, code={:?}", pid, code);
                exit_tx.send_replace(Some(code));
                break;
            }
            ReaperSignal::Kill(Some(reply)) => {
                let _ = reply.send(child.start_kill());
            }
            // 句柄已释放（宿主选择让服务器继续运行），只等待退出
            ReaperSignal::Kill(None) => handle_open = false,
        }
    }
}

#[async_trait]
impl ServerProcess for OwnedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&self) -> ProcessPoll {
        match *self.exit_rx.borrow() {
            None => ProcessPoll::Running,
            Some(code) => ProcessPoll::Exited(code),
        }
    }

    async fn try_send_command(&self, command: &str) -> ProcessResult<()> {
        if !self.is_alive() {
            return Err(ProcessError::WriteAfterDeath { pid: self.pid });
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or(ProcessError::WriteAfterDeath { pid: self.pid })?;

        let line = format!("{}\n", command);
        let result = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            // 写入过程中进程退出（管道断开）
            Err(_) if !self.is_alive() => Err(ProcessError::WriteAfterDeath { pid: self.pid }),
            Err(source) => Err(ProcessError::CommandWrite { source }),
        }
    }

    async fn kill(&self) -> ProcessResult<()> {
        if !self.is_alive() {
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).is_err() {
            // 回收任务已结束，进程已退出
            return Ok(());
        }

        match reply_rx.await {
            Ok(Ok(())) | Err(_) => Ok(()),
            Ok(Err(_)) if !self.is_alive() => Ok(()),
            Ok(Err(e)) => Err(ProcessError::Kill {
                pid: self.pid,
                reason: e.to_string(),
            }),
        }
    }

    async fn wait(&self, timeout: Duration) -> ProcessPoll {
        match tokio::time::timeout(timeout, self.wait_exit()).await {
            Ok(code) => ProcessPoll::Exited(code),
            Err(_) => self.poll(),
        }
    }
}

/// 通过 PID 重新连接的进程
#[derive(Debug)]
pub struct ReconnectedProcess {
    pid: u32,
    system: Mutex<System>,
}

impl ReconnectedProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }

    /// 根据状态记录重新连接
    ///
    /// PID 不存在、已是僵尸进程、或启动时间晚于记录太多（PID 被复用）时返回 None
    pub fn attach(record: &StatusRecord) -> Option<Self> {
        let process = Self::new(record.pid);
        let start_time = process.start_time()?;

        let recorded = record.started_at.timestamp();
        if (start_time as i64) > recorded + PID_REUSE_TOLERANCE_SECS {
            warn!(
                "PID {} 的启动时间 ({}) 晚于状态记录 ({})，判定为 PID 已被其他进程复用",
                record.pid, start_time, recorded
            );
            return None;
        }
        Some(process)
    }

    /// 存活进程的启动时间（Unix 秒）
    fn start_time(&self) -> Option<u64> {
        let pid = Pid::from_u32(self.pid);
        let mut system = self.system.lock();
        // 每次重建，避免读到已消失进程的旧数据
        *system = System::new();
        if !system.refresh_process(pid) {
            return None;
        }
        let process = system.process(pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        Some(process.start_time())
    }
}

#[async_trait]
impl ServerProcess for ReconnectedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&self) -> ProcessPoll {
        if self.start_time().is_some() {
            ProcessPoll::Running
        } else {
            ProcessPoll::Exited(None)
        }
    }

    async fn try_send_command(&self, _command: &str) -> ProcessResult<()> {
        Err(ProcessError::CommandUnavailable { pid: self.pid })
    }

    async fn kill(&self) -> ProcessResult<()> {
        let pid = Pid::from_u32(self.pid);
        let killed = {
            let mut system = self.system.lock();
            *system = System::new();
            if !system.refresh_process(pid) {
                return Ok(());
            }
            match system.process(pid) {
                Some(process) => process.kill(),
                None => return Ok(()),
            }
        };

        if killed || !self.is_alive() {
            Ok(())
        } else {
            Err(ProcessError::Kill {
                pid: self.pid,
                reason: "系统拒绝终止该进程（权限不足？）".to_string(),
            })
        }
    }

    async fn wait(&self, timeout: Duration) -> ProcessPoll {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let poll = self.poll();
            if !poll.is_running() || tokio::time::Instant::now() >= deadline {
                return poll;
            }
            tokio::time::sleep(RECONNECTED_WAIT_POLL).await;
        }
    }
}
