use super::error::{DownloadError, DownloadResult};
use super::progress::ProgressAggregator;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;
use std::{ops::Range, path::PathBuf, time::Duration};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 写盘和上报进度的块大小: 64KB
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 分段信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 分段索引（合并顺序）
    pub index: usize,
    /// 字节范围（左闭右开）
    pub range: Range<u64>,
    /// 临时文件路径，只由负责该分段的 worker 写入
    pub path: PathBuf,
}

impl Segment {
    pub fn new(index: usize, range: Range<u64>, path: PathBuf) -> Self {
        Self { index, range, path }
    }

    /// 分段大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 闭区间末字节
    pub fn last_byte(&self) -> u64 {
        self.range.end.saturating_sub(1)
    }

    /// Range 请求头：`bytes=<start>-<end>`（闭区间）
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.range.start, self.last_byte())
    }

    fn transfer_error(&self, reason: impl Into<String>) -> DownloadError {
        DownloadError::SegmentTransfer {
            index: self.index,
            start: self.range.start,
            end: self.last_byte(),
            reason: reason.into(),
        }
    }

    /// 下载分段到临时文件（流式读取，每写入一块就更新进度）
    ///
    /// 收到的字节数必须恰好等于分段大小，多或少都视为失败
    pub async fn download(
        &self,
        client: &Client,
        url: &str,
        timeout: Duration,
        progress: &ProgressAggregator,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        debug!(
            "下载分段 #{}: {}, 临时文件 {:?}",
            self.index,
            self.range_header(),
            self.path
        );

        // 只在等待网络时响应取消；文件操作必须跑完，否则后台线程可能在清理后重新创建临时文件
        let request = client
            .get(url)
            .header(RANGE, self.range_header())
            .timeout(timeout)
            .send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            resp = request => resp.map_err(|e| self.transfer_error(format!("发送请求失败: {}", e)))?,
        };

        if !resp.status().is_success() {
            return Err(self.transfer_error(format!("HTTP {}", resp.status())));
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let mut file = File::create(&self.path)
            .await
            .map_err(|e| DownloadError::disk(&self.path, e))?;

        let expected = self.size();
        let mut received = 0u64;
        let mut stream = resp.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else { break };
            let data = item.map_err(|e| self.transfer_error(format!("读取数据流失败: {}", e)))?;

            for piece in data.chunks(CHUNK_SIZE) {
                let len = piece.len() as u64;
                if received + len > expected {
                    return Err(self.transfer_error(format!(
                        "响应超出分段长度（期望 {} 字节），服务器可能忽略了 Range",
                        expected
                    )));
                }
                file.write_all(piece)
                    .await
                    .map_err(|e| DownloadError::disk(&self.path, e))?;
                received += len;
                progress.add(self.index, len);
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::disk(&self.path, e))?;

        if received != expected {
            return Err(self.transfer_error(format!(
                "响应体被截断: 收到 {} / {} 字节",
                received, expected
            )));
        }

        debug!("分段 #{} 下载完成，大小: {} bytes", self.index, received);
        Ok(received)
    }
}

/// 实际分段数：min(请求数, max(1, total / 最小分段大小))
pub fn effective_segment_count(total: u64, requested: usize, min_segment_size: u64) -> usize {
    let by_size = (total / min_segment_size.max(1)).max(1);
    let by_size = usize::try_from(by_size).unwrap_or(usize::MAX);
    requested.max(1).min(by_size)
}

/// 把 `[0, total)` 切成 `count` 段连续、无重叠、无空隙的区间
///
/// 前 N-1 段长度为 total / count，最后一段吸收整除余数。
/// count 大于 total 时收缩为 total 段，保证每段非空
pub fn plan_ranges(total: u64, count: usize) -> Vec<Range<u64>> {
    if total == 0 {
        return Vec::new();
    }
    let count = (count.max(1) as u64).min(total);
    let part = total / count;

    (0..count)
        .map(|i| {
            let start = part * i;
            let end = if i == count - 1 { total } else { start + part };
            start..end
        })
        .collect()
}
