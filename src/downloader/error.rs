// 下载错误类型定义

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 下载错误
///
/// 任意一种错误都会让整个下载失败：目标文件不会被创建，临时分段文件会被清理
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 探测阶段的网络错误（DNS / TLS / 连接失败）
    #[error("无法连接下载地址 {url}，请检查网络或代理设置: {source}")]
    Probe {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 某个分段传输失败（HTTP 错误、连接中断、响应体截断）
    #[error("分段 #{index} (bytes={start}-{end}) 下载失败: {reason}")]
    SegmentTransfer {
        index: usize,
        start: u64,
        end: u64,
        reason: String,
    },

    /// 单线程下载传输失败
    #[error("下载 {url} 失败: {reason}")]
    Stream { url: String, reason: String },

    /// 服务器返回非 2xx 状态码
    #[error("服务器返回 HTTP {status}: {url}")]
    HttpStatus { url: String, status: u16 },

    /// 合并时分段文件缺失或长度不符（内部不变量被破坏）
    #[error("合并分段失败（内部错误，分段文件 {path:?} 异常）: {reason}")]
    Merge { path: PathBuf, reason: String },

    /// 磁盘写入失败（权限 / 空间不足）
    #[error("写入 {path:?} 失败，请检查目录权限和磁盘空间: {source}")]
    Disk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 下载完成但校验和不匹配
    #[error("文件校验失败: 期望 sha1={expected}，实际 sha1={actual}")]
    Integrity { expected: String, actual: String },

    /// 调用方取消
    #[error("下载已取消")]
    Cancelled,
}

impl DownloadError {
    pub fn disk(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Disk {
            path: path.into(),
            source,
        }
    }

    /// 是否为调用方主动取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;
