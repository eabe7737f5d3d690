//! 进度汇总
//!
//! - `ProgressReporter`: 事件出口，可选地把本地 0-100 映射到总进度的一段区间（加权进度）
//! - `ProgressAggregator`: 把 N 个分段的字节计数器汇总成一个百分比

use super::events::{DownloadEvent, DownloadEventSender};
use parking_lot::Mutex;

/// 计算整数百分比：floor(100 * done / total)，上限 100
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (done as u128 * 100) / total as u128;
    percent.min(100) as u8
}

/// 进度事件出口
///
/// 克隆代价很低。`silent()` 丢弃所有事件
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<DownloadEventSender>,
    /// 本阶段在总进度中占的区间 [start, end]
    window: (u8, u8),
}

impl ProgressReporter {
    pub fn new(tx: DownloadEventSender) -> Self {
        Self {
            tx: Some(tx),
            window: (0, 100),
        }
    }

    /// 不上报任何事件
    pub fn silent() -> Self {
        Self {
            tx: None,
            window: (0, 100),
        }
    }

    /// 取当前区间中的一段作为子阶段区间
    ///
    /// 例如 JRE 安装：下载占 0-70，解压占 70-100
    pub fn weighted(&self, start: u8, end: u8) -> Self {
        let start = start.min(100);
        let end = end.clamp(start, 100);
        Self {
            tx: self.tx.clone(),
            window: (self.map(start), self.map(end)),
        }
    }

    /// 把本地百分比映射到总进度
    pub fn map(&self, local: u8) -> u8 {
        let (start, end) = self.window;
        let local = local.min(100) as u32;
        (start as u32 + (end - start) as u32 * local / 100) as u8
    }

    pub fn window(&self) -> (u8, u8) {
        self.window
    }

    /// 上报字节进度
    pub fn progress(&self, task_id: &str, downloaded: u64, total: u64) {
        self.emit(DownloadEvent::Progress {
            task_id: task_id.to_string(),
            downloaded_size: downloaded,
            total_size: total,
            progress: self.map(percent_of(downloaded, total)),
        });
    }

    /// 上报非字节类阶段（例如解压）的本地百分比
    pub fn percent(&self, task_id: &str, local: u8) {
        self.emit(DownloadEvent::Progress {
            task_id: task_id.to_string(),
            downloaded_size: local as u64,
            total_size: 100,
            progress: self.map(local),
        });
    }

    /// 推送事件；消费者已关闭时静默丢弃
    pub fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// 共享进度状态（每个下载任务一把锁）
#[derive(Debug)]
struct ProgressState {
    /// 每个分段已接收字节数
    received: Vec<u64>,
    /// 所有分段之和
    sum: u64,
    /// 任务结束后不再上报
    closed: bool,
}

/// 分段进度汇总器
///
/// 计数器只增不减，因此上报的百分比单调不减。
/// 百分比在锁内计算并投递到无界通道（非阻塞），保证事件顺序与计数顺序一致
#[derive(Debug)]
pub struct ProgressAggregator {
    task_id: String,
    total: u64,
    state: Mutex<ProgressState>,
    reporter: ProgressReporter,
}

impl ProgressAggregator {
    pub fn new(
        task_id: impl Into<String>,
        total: u64,
        slots: usize,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            total,
            state: Mutex::new(ProgressState {
                received: vec![0; slots.max(1)],
                sum: 0,
                closed: false,
            }),
            reporter,
        }
    }

    /// 分段 `slot` 新收到 `bytes` 字节
    pub fn add(&self, slot: usize, bytes: u64) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Some(counter) = state.received.get_mut(slot) {
            *counter += bytes;
            state.sum += bytes;
            self.reporter.progress(&self.task_id, state.sum, self.total);
        }
    }

    /// 已接收总字节数
    pub fn downloaded(&self) -> u64 {
        self.state.lock().sum
    }

    /// 某分段已接收字节数
    pub fn segment_bytes(&self, slot: usize) -> u64 {
        self.state.lock().received.get(slot).copied().unwrap_or(0)
    }

    /// 当前百分比
    pub fn percent(&self) -> u8 {
        percent_of(self.downloaded(), self.total)
    }

    /// 关闭汇总器，之后的 `add` 不再产生事件
    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}
