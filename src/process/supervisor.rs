//! 服务器进程管理器
//!
//! 状态机：`Stopped → Starting → Running(Owned | Reconnected) → Stopping → Stopped`
//!
//! - 每个自有进程有一个输出读取任务：交错读取 stdout/stderr，EOF 后等待进程退出并执行终态转换，
//!   因此崩溃（没有调用 stop）也会清理状态文件并回到 `Stopped`
//! - 重新连接的进程没有管道，由后台任务定期检查 PID 是否存活
//! - 终态转换带代数（generation）校验：旧进程的读取任务不会覆盖新进程的状态

use super::error::{ProcessError, ProcessResult};
use super::events::{OutputStream, ServerEvent, ServerEventSender};
use super::handle::{OutputPipes, OwnedProcess, ProcessPoll, ReconnectedProcess, ServerProcess};
use super::launch::LaunchSpec;
use super::state::{ExitChoice, RunMode, StopMode, StopOutcome, SupervisorState};
use super::status_store::{StatusRecord, StatusStore};
use crate::config::ServerConfig;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// 正常停止时写入的命令
pub const STOP_COMMAND: &str = "stop";

/// 强制终止后等待进程消失的时间
const KILL_WAIT: Duration = Duration::from_secs(10);

const RECONNECTED_WARNING: &str =
    "已重新连接到上次运行的服务器，控制台输出和命令通道不可用；停止时只能强制终止";

#[derive(Debug)]
struct Slot {
    state: SupervisorState,
    process: Option<Arc<dyn ServerProcess>>,
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    server_dir: PathBuf,
    store: StatusStore,
    stop_timeout: Duration,
    reattach_poll: Duration,
    events: Option<ServerEventSender>,
    slot: Mutex<Slot>,
}

impl Inner {
    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 修改状态并发出事件（调用方持有锁，保证事件顺序与状态一致）
    fn set_state(&self, slot: &mut Slot, state: SupervisorState) {
        slot.state = state;
        self.emit(ServerEvent::StateChanged { state });
    }

    fn is_current(&self, generation: u64) -> bool {
        let slot = self.slot.lock();
        slot.generation == generation && slot.process.is_some()
    }

    /// 终态转换：删除状态文件，回到 `Stopped`
    ///
    /// 幂等：同一进程只会生效一次，代数不匹配时什么都不做
    fn finalize(&self, generation: u64, code: Option<i32>) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return false;
        }
        let Some(process) = slot.process.take() else {
            return false;
        };

        let pid = process.pid();
        let requested = slot.state == SupervisorState::Stopping;
        if let Err(e) = self.store.clear() {
            warn!("删除状态文件失败: {}", e);
        }

        if requested {
            info!("服务器已停止: pid={}, code={:?}", pid, code);
        } else {
            warn!("服务器进程意外退出: pid={}, code={:?}", pid, code);
        }
        self.emit(ServerEvent::Exited {
            pid,
            code,
            requested,
        });
        self.set_state(&mut slot, SupervisorState::Stopped);
        true
    }
}

/// 服务器进程管理器
///
/// 克隆共享同一个内部状态
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(
        server_dir: impl Into<PathBuf>,
        config: &ServerConfig,
        events: Option<ServerEventSender>,
    ) -> Self {
        let server_dir = server_dir.into();
        Self {
            inner: Arc::new(Inner {
                store: StatusStore::new(&server_dir),
                server_dir,
                stop_timeout: Duration::from_secs(config.stop_timeout_secs.max(1)),
                reattach_poll: Duration::from_secs(config.reattach_poll_secs.max(1)),
                events,
                slot: Mutex::new(Slot {
                    state: SupervisorState::Stopped,
                    process: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// 创建并立即检查状态文件（需在 tokio 运行时内调用）
    pub fn open(
        server_dir: impl Into<PathBuf>,
        config: &ServerConfig,
        events: Option<ServerEventSender>,
    ) -> Self {
        let supervisor = Self::new(server_dir, config, events);
        supervisor.check_existing();
        supervisor
    }

    pub fn server_dir(&self) -> &Path {
        &self.inner.server_dir
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.inner.store
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.slot.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.state().pid()
    }

    /// `stop()` 会采用的方式；未运行时为 None
    ///
    /// 调用方应在 `ForceKill` 时先提示用户（未保存的世界数据会丢失）
    pub fn stop_mode(&self) -> Option<StopMode> {
        match self.state() {
            SupervisorState::Running {
                mode: RunMode::Owned,
                ..
            } => Some(StopMode::Graceful),
            SupervisorState::Running {
                mode: RunMode::Reconnected,
                ..
            } => Some(StopMode::ForceKill),
            _ => None,
        }
    }

    /// 读取状态文件，决定是否重新连接到已在运行的服务器
    ///
    /// 不会返回错误：文件缺失、损坏、PID 已退出都按 `Stopped` 处理
    pub fn check_existing(&self) -> SupervisorState {
        let current = self.state();
        if current != SupervisorState::Stopped {
            return current;
        }

        let store = &self.inner.store;
        let record = match store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return SupervisorState::Stopped,
            Err(e @ ProcessError::Reattach { .. }) => {
                warn!("{}", e);
                if let Err(e) = store.clear() {
                    warn!("删除损坏的状态文件失败: {}", e);
                }
                return SupervisorState::Stopped;
            }
            Err(e) => {
                warn!("无法读取状态文件，按无运行中的服务器处理: {}", e);
                return SupervisorState::Stopped;
            }
        };

        let Some(process) = ReconnectedProcess::attach(&record) else {
            warn!(
                "状态文件记录的服务器进程已不存在 (pid={})，清理过期记录",
                record.pid
            );
            if let Err(e) = store.clear() {
                warn!("删除过期状态文件失败: {}", e);
            }
            return SupervisorState::Stopped;
        };

        let process = Arc::new(process);
        let state = SupervisorState::Running {
            pid: record.pid,
            mode: RunMode::Reconnected,
        };
        let generation = {
            let mut slot = self.inner.slot.lock();
            if slot.state != SupervisorState::Stopped {
                return slot.state;
            }
            slot.generation += 1;
            slot.process = Some(process.clone());

            warn!(
                "重新连接到服务器进程 pid={} ({})：{}",
                record.pid, record.jar_file, RECONNECTED_WARNING
            );
            self.inner.emit(ServerEvent::Reattached {
                pid: record.pid,
                started_at: record.started_at,
                jar_file: record.jar_file.clone(),
                warning: RECONNECTED_WARNING.to_string(),
            });
            self.inner.set_state(&mut slot, state);
            slot.generation
        };

        tokio::spawn(watch_reconnected(self.inner.clone(), generation, process));
        state
    }

    /// 启动服务器，仅在 `Stopped` 状态下有效
    ///
    /// 状态文件仍指向存活进程（例如 `detach` 之后）时先重新连接并拒绝启动，
    /// 同一目录不会出现第二个服务器
    pub async fn start(&self, spec: &LaunchSpec) -> ProcessResult<u32> {
        if self.state() == SupervisorState::Stopped && self.inner.store.exists() {
            if let SupervisorState::Running { pid, .. } = self.check_existing() {
                warn!("目录中已有运行中的服务器 (pid={})，拒绝重复启动", pid);
            }
        }

        {
            let mut slot = self.inner.slot.lock();
            if slot.state != SupervisorState::Stopped {
                return Err(ProcessError::InvalidState {
                    state: slot.state,
                    operation: "启动",
                });
            }
            self.inner.set_state(&mut slot, SupervisorState::Starting);
        }

        let (process, pipes) = match OwnedProcess::spawn(spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                let mut slot = self.inner.slot.lock();
                self.inner.set_state(&mut slot, SupervisorState::Stopped);
                return Err(e);
            }
        };

        let pid = process.pid();
        if let Err(e) = self
            .inner
            .store
            .save(&StatusRecord::running(pid, &spec.jar_file))
        {
            warn!("保存状态文件失败，启动器重启后将无法重新连接: {}", e);
        }

        let process = Arc::new(process);
        let generation = {
            let mut slot = self.inner.slot.lock();
            slot.generation += 1;
            slot.process = Some(process.clone());
            self.inner.set_state(
                &mut slot,
                SupervisorState::Running {
                    pid,
                    mode: RunMode::Owned,
                },
            );
            slot.generation
        };

        tokio::spawn(pump_output(self.inner.clone(), generation, process, pipes));
        info!("服务器已启动: pid={}, jar={}", pid, spec.jar_file);
        Ok(pid)
    }

    /// 向服务器发送一行命令
    pub async fn send_command(&self, command: &str) -> ProcessResult<()> {
        let process = {
            let slot = self.inner.slot.lock();
            match slot.state {
                SupervisorState::Running { .. } => {
                    slot.process.clone().ok_or(ProcessError::NotRunning)?
                }
                SupervisorState::Stopped => return Err(ProcessError::NotRunning),
                state => {
                    return Err(ProcessError::InvalidState {
                        state,
                        operation: "发送命令",
                    })
                }
            }
        };

        let command = command.trim_end_matches(&['\r', '\n'][..]);
        process.try_send_command(command).await?;

        debug!("已发送命令: {}", command);
        self.inner.emit(ServerEvent::CommandSent {
            command: command.to_string(),
        });
        Ok(())
    }

    /// 停止服务器
    ///
    /// - 自有进程：写入 `stop`，等待退出（有截止时间），超时强制终止
    /// - 重新连接的进程：先发出 `ForceKillPending`，然后直接强制终止
    ///
    /// 无论哪种方式，返回前状态文件都已删除、状态回到 `Stopped`
    pub async fn stop(&self) -> ProcessResult<StopOutcome> {
        let (process, generation, mode) = {
            let mut slot = self.inner.slot.lock();
            match slot.state {
                SupervisorState::Running { mode, .. } => {
                    let Some(process) = slot.process.clone() else {
                        return Err(ProcessError::NotRunning);
                    };
                    self.inner.set_state(&mut slot, SupervisorState::Stopping);
                    (process, slot.generation, mode)
                }
                SupervisorState::Stopped => return Err(ProcessError::NotRunning),
                state => {
                    return Err(ProcessError::InvalidState {
                        state,
                        operation: "停止",
                    })
                }
            }
        };

        let result = match mode {
            RunMode::Owned => self.stop_gracefully(process.as_ref()).await,
            RunMode::Reconnected => self.force_kill(process.as_ref()).await,
        };

        match result {
            Ok((outcome, code)) => {
                self.inner.finalize(generation, code);
                Ok(outcome)
            }
            Err(e) => {
                error!("停止服务器失败: {}", e);
                if process.is_alive() {
                    let mut slot = self.inner.slot.lock();
                    if slot.generation == generation && slot.state == SupervisorState::Stopping {
                        let pid = process.pid();
                        self.inner
                            .set_state(&mut slot, SupervisorState::Running { pid, mode });
                    }
                } else {
                    self.inner.finalize(generation, None);
                }
                Err(e)
            }
        }
    }

    async fn stop_gracefully(
        &self,
        process: &dyn ServerProcess,
    ) -> ProcessResult<(StopOutcome, Option<i32>)> {
        match process.try_send_command(STOP_COMMAND).await {
            Ok(()) => {
                info!(
                    "已发送 stop 命令，等待服务器退出（最多 {} 秒）",
                    self.inner.stop_timeout.as_secs()
                );
                self.inner.emit(ServerEvent::CommandSent {
                    command: STOP_COMMAND.to_string(),
                });
            }
            Err(e) => warn!("发送 stop 命令失败: {}", e),
        }

        if let ProcessPoll::Exited(code) = process.wait(self.inner.stop_timeout).await {
            return Ok((StopOutcome::Graceful, code));
        }

        warn!(
            "服务器在 {} 秒内未退出，强制终止 (pid={})",
            self.inner.stop_timeout.as_secs(),
            process.pid()
        );
        process.kill().await?;
        let poll = process.wait(KILL_WAIT).await;
        if poll.is_running() {
            warn!("强制终止后进程仍未退出 (pid={})", process.pid());
        }
        Ok((StopOutcome::KilledAfterTimeout, poll.exit_code()))
    }

    async fn force_kill(
        &self,
        process: &dyn ServerProcess,
    ) -> ProcessResult<(StopOutcome, Option<i32>)> {
        let pid = process.pid();
        let reason = "重新连接的服务器没有命令通道，无法正常停止，未保存的数据会丢失";
        warn!("{} (pid={})", reason, pid);
        self.inner.emit(ServerEvent::ForceKillPending {
            pid,
            mode: StopMode::ForceKill,
            reason: reason.to_string(),
        });

        process.kill().await?;
        if process.wait(KILL_WAIT).await.is_running() {
            return Err(ProcessError::Kill {
                pid,
                reason: "发出终止信号后进程仍在运行".to_string(),
            });
        }
        Ok((StopOutcome::ForceKilled, None))
    }

    /// 放开当前进程：服务器继续运行，状态文件保留供下次重新连接
    ///
    /// 之后的 `start()` 会重新连接到该进程而不是启动新进程
    pub fn detach(&self) -> Option<u32> {
        let mut slot = self.inner.slot.lock();
        if !slot.state.is_running() {
            return None;
        }
        let process = slot.process.take()?;
        // 使旧的读取/监视任务失效，它们不会再删除状态文件
        slot.generation += 1;

        let pid = process.pid();
        info!("服务器保持运行 (pid={})，状态文件已保留", pid);
        self.inner.set_state(&mut slot, SupervisorState::Stopped);
        Some(pid)
    }

    /// 宿主退出流程
    ///
    /// 返回 `true` 表示宿主可以退出，`false` 表示取消退出
    pub async fn shutdown_host(&self, choice: ExitChoice) -> ProcessResult<bool> {
        if choice == ExitChoice::Cancel {
            return Ok(false);
        }
        if self.state() == SupervisorState::Stopped {
            return Ok(true);
        }

        match choice {
            ExitChoice::StopAndExit => {
                let outcome = self.stop().await?;
                info!("服务器已停止 ({:?})，准备退出", outcome);
            }
            ExitChoice::LeaveRunning => {
                self.detach();
            }
            ExitChoice::Cancel => return Ok(false),
        }
        Ok(true)
    }
}

/// 输出读取任务：交错读取 stdout/stderr，直到两者都 EOF，然后等待退出并执行终态转换
async fn pump_output(
    inner: Arc<Inner>,
    generation: u64,
    process: Arc<OwnedProcess>,
    pipes: OutputPipes,
) {
    let mut stdout = pipes.stdout.map(|s| BufReader::new(s).split(b'\n'));
    let mut stderr = pipes.stderr.map(|s| BufReader::new(s).split(b'\n'));

    while stdout.is_some() || stderr.is_some() {
        let (line, stream) = tokio::select! {
            line = read_line(&mut stdout), if stdout.is_some() => (line, OutputStream::Stdout),
            line = read_line(&mut stderr), if stderr.is_some() => (line, OutputStream::Stderr),
        };
        match line {
            Some(line) => inner.emit(ServerEvent::Output { stream, line }),
            None => match stream {
                OutputStream::Stdout => stdout = None,
                OutputStream::Stderr => stderr = None,
            },
        }
    }

    debug!("服务器输出已结束: pid={}", process.pid());
    let code = process.wait_exit().await;
    inner.finalize(generation, code);
}

/// 读一行（非 UTF-8 字节按有损方式转换），EOF 或读取错误返回 None
async fn read_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Split<R>>) -> Option<String> {
    let lines = lines.as_mut()?;
    match lines.next_segment().await {
        Ok(Some(bytes)) => {
            let mut line = String::from_utf8_lossy(&bytes).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            Some(line)
        }
        Ok(None) => None,
        Err(e) => {
            debug!("读取服务器输出失败: {}", e);
            None
        }
    }
}

/// 监视重新连接的进程，消失后执行终态转换
async fn watch_reconnected(inner: Arc<Inner>, generation: u64, process: Arc<ReconnectedProcess>) {
    let mut ticker = tokio::time::interval(inner.reattach_poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !inner.is_current(generation) {
            break;
        }
        if !process.is_alive() {
            if inner.finalize(generation, None) {
                info!("重新连接的服务器进程已退出 (pid={})", process.pid());
            }
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::events::{server_event_channel, ServerEventReceiver};
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn supervisor(dir: &TempDir, stop_timeout_secs: u64) -> (ProcessSupervisor, ServerEventReceiver) {
        let config = ServerConfig {
            stop_timeout_secs,
            reattach_poll_secs: 1,
            ..Default::default()
        };
        let (tx, rx) = server_event_channel();
        (ProcessSupervisor::new(dir.path(), &config, Some(tx)), rx)
    }

    fn script(dir: &TempDir, body: &str) -> LaunchSpec {
        LaunchSpec::custom(
            "/bin/sh",
            vec!["-c".to_string(), body.to_string()],
            dir.path(),
            "test.jar",
        )
    }

    /// 收集事件直到满足条件（含该事件）
    async fn collect_until(
        rx: &mut ServerEventReceiver,
        done: impl Fn(&ServerEvent) -> bool,
    ) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(15), async {
            while let Some(event) = rx.recv().await {
                let finished = done(&event);
                events.push(event);
                if finished {
                    return;
                }
            }
            panic!("事件通道已关闭");
        })
        .await
        .expect("等待事件超时");
        events
    }

    fn is_output(event: &ServerEvent, text: &str) -> bool {
        matches!(event, ServerEvent::Output { line, .. } if line == text)
    }

    fn is_stopped(event: &ServerEvent) -> bool {
        matches!(
            event,
            ServerEvent::StateChanged {
                state: SupervisorState::Stopped
            }
        )
    }

    #[tokio::test]
    async fn test_crash_clears_record_without_stop() {
        let dir = TempDir::new().unwrap();
        let (sup, mut rx) = supervisor(&dir, 30);

        sup.start(&script(&dir, "echo booting; echo oops >&2; exit 3"))
            .await
            .unwrap();
        let events = collect_until(&mut rx, is_stopped).await;

        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Output { stream: OutputStream::Stdout, line } if line == "booting"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Output { stream: OutputStream::Stderr, line } if line == "oops"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Exited { code: Some(3), requested: false, .. }
        )));
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());
    }

    #[tokio::test]
    async fn test_send_command_then_graceful_stop() {
        let dir = TempDir::new().unwrap();
        let (sup, mut rx) = supervisor(&dir, 30);
        let body = r#"echo ready
while read line; do
  echo "got:$line"
  if [ "$line" = "stop" ]; then exit 0; fi
done"#;

        let pid = sup.start(&script(&dir, body)).await.unwrap();
        collect_until(&mut rx, |e| is_output(e, "ready")).await;

        let record = sup.status_store().load().unwrap().unwrap();
        assert_eq!(record.pid, pid);
        assert_eq!(record.jar_file, "test.jar");

        sup.send_command("say hi").await.unwrap();
        collect_until(&mut rx, |e| is_output(e, "got:say hi")).await;

        assert_eq!(sup.stop_mode(), Some(StopMode::Graceful));
        let started = Instant::now();
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Graceful);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());

        let events = collect_until(&mut rx, is_stopped).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::Exited { requested: true, .. })));
    }

    #[tokio::test]
    async fn test_stop_kills_after_timeout() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = supervisor(&dir, 1);

        sup.start(&script(&dir, "exec sleep 30")).await.unwrap();
        assert!(sup.status_store().exists());

        let started = Instant::now();
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::KilledAfterTimeout);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = supervisor(&dir, 1);

        assert!(matches!(
            sup.send_command("say hi").await,
            Err(ProcessError::NotRunning)
        ));
        assert!(matches!(sup.stop().await, Err(ProcessError::NotRunning)));

        let missing = LaunchSpec::custom("/nonexistent/java", vec![], dir.path(), "x.jar");
        assert!(matches!(
            sup.start(&missing).await,
            Err(ProcessError::Spawn { .. })
        ));
        assert_eq!(sup.state(), SupervisorState::Stopped);

        sup.start(&script(&dir, "exec sleep 30")).await.unwrap();
        assert!(matches!(
            sup.start(&script(&dir, "true")).await,
            Err(ProcessError::InvalidState { .. })
        ));
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_and_corrupt_records_are_reclaimed() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = supervisor(&dir, 1);

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        sup.status_store()
            .save(&StatusRecord::running(dead_pid, "test.jar"))
            .unwrap();

        assert_eq!(sup.check_existing(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());

        std::fs::write(sup.status_store().path(), "garbage").unwrap();
        assert_eq!(sup.check_existing(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());
    }

    #[tokio::test]
    async fn test_reconnected_stop_force_kills() {
        let dir = TempDir::new().unwrap();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        StatusStore::new(dir.path())
            .save(&StatusRecord::running(pid, "test.jar"))
            .unwrap();

        let (sup, mut rx) = supervisor(&dir, 30);
        assert_eq!(
            sup.check_existing(),
            SupervisorState::Running {
                pid,
                mode: RunMode::Reconnected
            }
        );
        assert!(matches!(
            sup.send_command("say hi").await,
            Err(ProcessError::CommandUnavailable { .. })
        ));
        assert_eq!(sup.stop_mode(), Some(StopMode::ForceKill));

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::ForceKilled);
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());

        let events = collect_until(&mut rx, is_stopped).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::Reattached { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::ForceKillPending { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ServerEvent::CommandSent { .. })));

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_reconnected_exit_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        StatusStore::new(dir.path())
            .save(&StatusRecord::running(child.id(), "test.jar"))
            .unwrap();

        let (sup, mut rx) = supervisor(&dir, 30);
        assert!(sup.check_existing().is_running());

        child.kill().unwrap();
        child.wait().unwrap();

        collect_until(&mut rx, is_stopped).await;
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.status_store().exists());
    }

    #[tokio::test]
    async fn test_start_after_detach_reattaches_instead_of_spawning() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = supervisor(&dir, 1);

        let first = sup.start(&script(&dir, "exec sleep 30")).await.unwrap();
        assert_eq!(sup.detach(), Some(first));
        assert_eq!(sup.state(), SupervisorState::Stopped);

        let err = sup.start(&script(&dir, "exec sleep 30")).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidState {
                state: SupervisorState::Running {
                    mode: RunMode::Reconnected,
                    ..
                },
                ..
            }
        ));
        assert_eq!(sup.pid(), Some(first));
        assert_eq!(sup.status_store().load().unwrap().map(|r| r.pid), Some(first));

        // LeaveRunning 走同一路径
        assert!(sup.shutdown_host(ExitChoice::LeaveRunning).await.unwrap());
        assert!(sup.start(&script(&dir, "exec sleep 30")).await.is_err());
        assert_eq!(sup.status_store().load().unwrap().map(|r| r.pid), Some(first));

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::ForceKilled);
        assert!(!sup.status_store().exists());

        // 记录清理后可以正常启动
        let second = sup.start(&script(&dir, "exec sleep 30")).await.unwrap();
        assert_ne!(second, first);
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_host_choices() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = supervisor(&dir, 1);

        assert!(!sup.shutdown_host(ExitChoice::Cancel).await.unwrap());
        assert!(sup.shutdown_host(ExitChoice::StopAndExit).await.unwrap());
        assert!(sup.shutdown_host(ExitChoice::LeaveRunning).await.unwrap());

        let pid = sup.start(&script(&dir, "exec sleep 30")).await.unwrap();
        assert!(!sup.shutdown_host(ExitChoice::Cancel).await.unwrap());
        assert!(sup.state().is_running());

        assert!(sup.shutdown_host(ExitChoice::LeaveRunning).await.unwrap());
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert_eq!(sup.status_store().load().unwrap().map(|r| r.pid), Some(pid));

        // 模拟启动器重启
        let (next, _rx2) = supervisor(&dir, 1);
        assert_eq!(
            next.check_existing(),
            SupervisorState::Running {
                pid,
                mode: RunMode::Reconnected
            }
        );
        assert!(next.shutdown_host(ExitChoice::StopAndExit).await.unwrap());
        assert_eq!(next.state(), SupervisorState::Stopped);
        assert!(!next.status_store().exists());
    }
}
