//! 下载事件
//!
//! 下载器不直接回调界面层，而是把事件推入通道，由唯一的消费者（CLI / UI）取出处理

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// 下载任务事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// 开始传输
    Started {
        task_id: String,
        url: String,
        total_size: Option<u64>,
        segments: usize,
    },
    /// 服务器不支持分段，改用单线程下载
    FallbackSingleStream { task_id: String, reason: String },
    /// 进度更新（progress 为 0-100 的整数百分比，单调不减）
    Progress {
        task_id: String,
        downloaded_size: u64,
        total_size: u64,
        progress: u8,
    },
    /// 任务完成（之后不会再有该任务的进度事件）
    Completed {
        task_id: String,
        path: String,
        size: u64,
    },
    /// 任务失败
    Failed { task_id: String, error: String },
}

impl DownloadEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id, .. }
            | Self::FallbackSingleStream { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

pub type DownloadEventSender = UnboundedSender<DownloadEvent>;
pub type DownloadEventReceiver = UnboundedReceiver<DownloadEvent>;

/// 创建下载事件通道
pub fn download_event_channel() -> (DownloadEventSender, DownloadEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
