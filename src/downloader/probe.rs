use super::error::{DownloadError, DownloadResult};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// 探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// 声明的文件大小
    pub total_size: Option<u64>,
    /// 是否声明 `Accept-Ranges: bytes`
    pub accept_ranges: bool,
}

impl ProbeResult {
    /// 能否走分段下载：需要已知且非零的大小，并支持字节 Range
    pub fn supports_segmented(&self) -> bool {
        self.accept_ranges && matches!(self.total_size, Some(size) if size > 0)
    }

    /// 无法分段时的原因（用于日志和回退事件）
    pub fn fallback_reason(&self) -> Option<&'static str> {
        match (self.total_size, self.accept_ranges) {
            (None, _) => Some("服务器未返回 Content-Length"),
            (Some(0), _) => Some("服务器返回的文件大小为 0"),
            (_, false) => Some("服务器不支持 Range 请求"),
            _ => None,
        }
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let accept_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
            .unwrap_or(false);
        Self {
            total_size,
            accept_ranges,
        }
    }
}

/// HEAD 探测：读取文件大小和 Range 支持情况
#[derive(Debug, Clone)]
pub struct HttpRangeProbe {
    client: Client,
    timeout: Duration,
}

impl HttpRangeProbe {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// 发送 HEAD 请求
    ///
    /// 网络层错误返回 `DownloadError::Probe`；服务器拒绝 HEAD（非 2xx）不算错误，
    /// 按"能力未知"处理，由调用方回退到单线程下载
    pub async fn probe(&self, url: &str) -> DownloadResult<ProbeResult> {
        let resp = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| DownloadError::Probe {
                url: url.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            warn!("HEAD 探测返回 {}，按不支持分段处理: {}", resp.status(), url);
            return Ok(ProbeResult {
                total_size: None,
                accept_ranges: false,
            });
        }

        let result = ProbeResult::from_headers(resp.headers());
        debug!(
            "探测完成: url={}, size={:?}, accept_ranges={}",
            url, result.total_size, result.accept_ranges
        );
        Ok(result)
    }
}
