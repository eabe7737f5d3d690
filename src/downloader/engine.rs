use super::error::{DownloadError, DownloadResult};
use super::events::DownloadEvent;
use super::integrity::verify_sha1;
use super::probe::HttpRangeProbe;
use super::progress::{ProgressAggregator, ProgressReporter};
use super::segment::{effective_segment_count, plan_ranges, Segment};
use super::single::SingleStreamDownloader;
use super::task::DownloadTask;
use super::temp::TempFileGuard;
use crate::context::LauncherContext;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 分段并行下载器
///
/// 流程：HEAD 探测 → 切分区间 → 每段一个 worker 并发下载到 `<dest>.part<N>`
/// → 全部完成后按索引顺序合并到 `<dest>.part` → 原子重命名为 `<dest>`。
///
/// 任意分段失败即整体失败（不做分段重试），所有临时文件被删除，目标文件不会出现
#[derive(Debug, Clone)]
pub struct SegmentedDownloader {
    client: Client,
    timeout: Duration,
    min_segment_size: u64,
    probe: HttpRangeProbe,
    single: SingleStreamDownloader,
}

impl SegmentedDownloader {
    pub fn new(client: Client, timeout: Duration, min_segment_size: u64) -> Self {
        Self {
            probe: HttpRangeProbe::new(client.clone(), timeout),
            single: SingleStreamDownloader::new(client.clone(), timeout),
            client,
            timeout,
            min_segment_size: min_segment_size.max(1),
        }
    }

    pub fn from_context(ctx: &LauncherContext) -> Self {
        Self::new(
            ctx.http().clone(),
            ctx.request_timeout(),
            ctx.config().download.min_segment_size,
        )
    }

    /// 下载 `url` 到 `dest`，最多 `segment_hint` 个并发分段
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        segment_hint: usize,
        reporter: &ProgressReporter,
    ) -> DownloadResult<u64> {
        let mut task = DownloadTask::new(url, dest, segment_hint);
        self.download_task(&mut task, reporter).await
    }

    /// 下载任务（不可取消）
    pub async fn download_task(
        &self,
        task: &mut DownloadTask,
        reporter: &ProgressReporter,
    ) -> DownloadResult<u64> {
        self.download_with_cancel(task, reporter, &CancellationToken::new())
            .await
    }

    /// 下载任务，`cancel` 触发后所有 worker 停止读取并清理临时文件
    pub async fn download_with_cancel(
        &self,
        task: &mut DownloadTask,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let probe = match self.probe.probe(&task.url).await {
            Ok(probe) => probe,
            Err(e) => {
                error!("探测失败: task={}, error={}", task.id, e);
                reporter.emit(DownloadEvent::Failed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        task.total_size = probe.total_size;
        task.accept_ranges = probe.accept_ranges;

        let total = match (probe.fallback_reason(), probe.total_size) {
            (None, Some(total)) => total,
            (reason, _) => {
                let reason = reason.unwrap_or("未知原因");
                warn!("{}，回退到单线程下载: {}", reason, task.url);
                reporter.emit(DownloadEvent::FallbackSingleStream {
                    task_id: task.id.clone(),
                    reason: reason.to_string(),
                });
                task.segment_count = 1;
                return self.single.download_task(task, reporter, cancel).await;
            }
        };

        task.segment_count = effective_segment_count(total, task.segment_count, self.min_segment_size);
        info!(
            "开始分段下载: {} -> {:?}, size={}, segments={}",
            task.url, task.dest, total, task.segment_count
        );
        reporter.emit(DownloadEvent::Started {
            task_id: task.id.clone(),
            url: task.url.clone(),
            total_size: Some(total),
            segments: task.segment_count,
        });

        match self.run_segments(task, total, reporter, cancel).await {
            Ok(size) => {
                info!("分段下载完成: {:?} ({} bytes)", task.dest, size);
                reporter.emit(DownloadEvent::Completed {
                    task_id: task.id.clone(),
                    path: task.dest.display().to_string(),
                    size,
                });
                Ok(size)
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!("分段下载已取消: task={}", task.id);
                } else {
                    error!("分段下载失败: task={}, error={}", task.id, e);
                }
                reporter.emit(DownloadEvent::Failed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_segments(
        &self,
        task: &DownloadTask,
        total: u64,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let segments: Vec<Segment> = plan_ranges(total, task.segment_count)
            .into_iter()
            .enumerate()
            .map(|(index, range)| Segment::new(index, range, task.segment_path(index)))
            .collect();

        let mut guard = TempFileGuard::new();
        for segment in &segments {
            guard.track(&segment.path);
        }
        guard.track(task.staging_path());

        let aggregator = Arc::new(ProgressAggregator::new(
            task.id.clone(),
            total,
            segments.len(),
            reporter.clone(),
        ));

        // 子令牌：任一分段失败时取消其余分段，不影响调用方的令牌
        let workers_cancel = cancel.child_token();
        let mut workers = JoinSet::new();

        for segment in segments.iter().cloned() {
            let client = self.client.clone();
            let url = task.url.clone();
            let timeout = self.timeout;
            let aggregator = aggregator.clone();
            let token = workers_cancel.clone();

            // 不在外层 select 中丢弃 download future，取消由分段内部在安全点处理
            workers.spawn(async move {
                segment
                    .download(&client, &url, timeout, &aggregator, &token)
                    .await
            });
        }

        // 汇合屏障：等所有 worker 结束后才决定合并或失败
        let mut first_error: Option<DownloadError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(DownloadError::Stream {
                    url: task.url.clone(),
                    reason: format!("分段任务异常退出: {}", e),
                })
            });
            if let Err(e) = outcome {
                // 取消导致的连锁错误不覆盖真正的首个错误
                let replace = match &first_error {
                    None => true,
                    Some(existing) => existing.is_cancelled() && !e.is_cancelled(),
                };
                if replace {
                    debug!("分段失败，取消其余分段: {}", e);
                    workers_cancel.cancel();
                    first_error = Some(e);
                }
            }
        }
        aggregator.close();

        if let Some(e) = first_error {
            return Err(e);
        }

        let size = merge_segments(&segments, &task.staging_path()).await?;

        if let Some(expected) = &task.sha1 {
            verify_sha1(&task.staging_path(), expected).await?;
        }

        fs::rename(task.staging_path(), &task.dest)
            .await
            .map_err(|e| DownloadError::disk(&task.dest, e))?;

        guard.cleanup();
        Ok(size)
    }
}

/// 按索引顺序把分段逐字节拼接到 `output`
async fn merge_segments(segments: &[Segment], output: &Path) -> DownloadResult<u64> {
    let mut out = File::create(output)
        .await
        .map_err(|e| DownloadError::disk(output, e))?;
    let mut written = 0u64;

    for segment in segments {
        let len = fs::metadata(&segment.path)
            .await
            .map_err(|e| DownloadError::Merge {
                path: segment.path.clone(),
                reason: format!("分段文件不存在: {}", e),
            })?
            .len();
        if len != segment.size() {
            return Err(DownloadError::Merge {
                path: segment.path.clone(),
                reason: format!("分段长度 {} 与预期 {} 不符", len, segment.size()),
            });
        }

        let mut input = File::open(&segment.path)
            .await
            .map_err(|e| DownloadError::Merge {
                path: segment.path.clone(),
                reason: format!("打开分段文件失败: {}", e),
            })?;
        written += tokio::io::copy(&mut input, &mut out)
            .await
            .map_err(|e| DownloadError::disk(output, e))?;
    }

    out.flush()
        .await
        .map_err(|e| DownloadError::disk(output, e))?;
    out.sync_all()
        .await
        .map_err(|e| DownloadError::disk(output, e))?;

    debug!("已合并 {} 个分段 -> {:?} ({} bytes)", segments.len(), output, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::events::{download_event_channel, DownloadEventReceiver};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const FILE_LEN: usize = 300_001;

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    fn parse_range(req: &Request) -> Option<(usize, usize)> {
        let value = req.headers.get("range")?.to_str().ok()?;
        let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    }

    /// 按 Range 返回 206，可让指定起点的分段失败或截断
    struct RangeResponder {
        body: Vec<u8>,
        fail_start: Option<usize>,
        truncate_start: Option<usize>,
        delay: Duration,
    }

    impl RangeResponder {
        fn ok(body: Vec<u8>) -> Self {
            Self {
                body,
                fail_start: None,
                truncate_start: None,
                delay: Duration::ZERO,
            }
        }
    }

    impl Respond for RangeResponder {
        fn respond(&self, req: &Request) -> ResponseTemplate {
            let Some((start, end)) = parse_range(req) else {
                return ResponseTemplate::new(200).set_body_bytes(self.body.clone());
            };
            if self.fail_start == Some(start) {
                return ResponseTemplate::new(500).set_delay(self.delay);
            }
            let mut slice = self.body[start..=end].to_vec();
            if self.truncate_start == Some(start) {
                slice.truncate(slice.len() / 2);
            }
            ResponseTemplate::new(206)
                .set_body_bytes(slice)
                .set_delay(self.delay)
        }
    }

    async fn mount(server: &MockServer, responder: RangeResponder, accept_ranges: bool) {
        let mut head = ResponseTemplate::new(200)
            .insert_header("Content-Length", responder.body.len().to_string().as_str());
        if accept_ranges {
            head = head.insert_header("Accept-Ranges", "bytes");
        }
        Mock::given(method("HEAD"))
            .and(path("/server.jar"))
            .respond_with(head)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/server.jar"))
            .respond_with(responder)
            .mount(server)
            .await;
    }

    fn downloader() -> SegmentedDownloader {
        SegmentedDownloader::new(Client::new(), Duration::from_secs(10), 1)
    }

    fn leftover_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect()
    }

    fn collect(rx: &mut DownloadEventReceiver) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_segmented_download_matches_single_stream() {
        let server = MockServer::start().await;
        let data = body(FILE_LEN);
        mount(&server, RangeResponder::ok(data.clone()), true).await;
        let url = format!("{}/server.jar", server.uri());

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let (tx, mut rx) = download_event_channel();

        let size = downloader()
            .download(&url, &dest, 4, &ProgressReporter::new(tx))
            .await
            .unwrap();
        assert_eq!(size, FILE_LEN as u64);

        let single_dest = dir.path().join("single.jar");
        SingleStreamDownloader::new(Client::new(), Duration::from_secs(10))
            .download(&url, &single_dest, &ProgressReporter::silent())
            .await
            .unwrap();

        let segmented = std::fs::read(&dest).unwrap();
        assert_eq!(segmented, data);
        assert_eq!(segmented, std::fs::read(&single_dest).unwrap());

        let mut names = leftover_files(dir.path());
        names.sort();
        assert_eq!(names, vec!["server.jar".to_string(), "single.jar".to_string()]);

        let events = collect(&mut rx);
        assert!(matches!(events.first(), Some(DownloadEvent::Started { segments: 4, .. })));
        assert!(matches!(events.last(), Some(DownloadEvent::Completed { .. })));
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last().copied(), Some(100));
    }

    #[tokio::test]
    async fn test_falls_back_without_range_support() {
        let server = MockServer::start().await;
        let data = body(10_000);
        mount(&server, RangeResponder::ok(data.clone()), false).await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let (tx, mut rx) = download_event_channel();

        downloader()
            .download(
                &format!("{}/server.jar", server.uri()),
                &dest,
                8,
                &ProgressReporter::new(tx),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        let events = collect(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, DownloadEvent::FallbackSingleStream { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, DownloadEvent::Started { segments: 1, .. })));
    }

    #[tokio::test]
    async fn test_failed_segment_fails_whole_download() {
        let server = MockServer::start().await;
        let data = body(FILE_LEN);
        let responder = RangeResponder {
            body: data,
            fail_start: Some(FILE_LEN / 4 * 2),
            truncate_start: None,
            delay: Duration::ZERO,
        };
        mount(&server, responder, true).await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let (tx, mut rx) = download_event_channel();

        let err = downloader()
            .download(
                &format!("{}/server.jar", server.uri()),
                &dest,
                4,
                &ProgressReporter::new(tx),
            )
            .await
            .unwrap_err();

        match err {
            DownloadError::SegmentTransfer { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
        assert!(leftover_files(dir.path()).is_empty());
        assert!(matches!(
            collect(&mut rx).last(),
            Some(DownloadEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_segment_failure_leaves_no_part_files() {
        const LEN: usize = 64_000;
        let server = MockServer::start().await;
        // 所有分段同时收到响应，其中首段失败，其余分段正准备创建临时文件
        let responder = RangeResponder {
            body: body(LEN),
            fail_start: Some(0),
            truncate_start: None,
            delay: Duration::from_millis(30),
        };
        mount(&server, responder, true).await;
        let url = format!("{}/server.jar", server.uri());

        for round in 0..40 {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("s.jar");
            let err = downloader()
                .download(&url, &dest, 64, &ProgressReporter::silent())
                .await
                .unwrap_err();
            assert!(matches!(err, DownloadError::SegmentTransfer { index: 0, .. }));

            tokio::time::sleep(Duration::from_millis(20)).await;
            let leftover = leftover_files(dir.path());
            assert!(leftover.is_empty(), "round {round}: {leftover:?}");
        }
    }

    #[tokio::test]
    async fn test_truncated_segment_is_detected() {
        let server = MockServer::start().await;
        let responder = RangeResponder {
            body: body(FILE_LEN),
            fail_start: None,
            truncate_start: Some(0),
            delay: Duration::ZERO,
        };
        mount(&server, responder, true).await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let err = downloader()
            .download(
                &format!("{}/server.jar", server.uri()),
                &dest,
                3,
                &ProgressReporter::silent(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::SegmentTransfer { index: 0, .. }));
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_server_ignoring_range_is_rejected() {
        let server = MockServer::start().await;
        let data = body(50_000);
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "50000")
                    .insert_header("Accept-Ranges", "bytes"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let err = downloader()
            .download(&server.uri(), &dest, 2, &ProgressReporter::silent())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::SegmentTransfer { .. }));
        assert!(!dest.exists());
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_nothing() {
        let server = MockServer::start().await;
        mount(&server, RangeResponder::ok(body(FILE_LEN)), true).await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let mut task = DownloadTask::new(format!("{}/server.jar", server.uri()), &dest, 4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = downloader()
            .download_with_cancel(&mut task, &ProgressReporter::silent(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_merge_detects_missing_segment() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("a.part0");
        std::fs::write(&present, b"12345").unwrap();
        let segments = vec![
            Segment::new(0, 0..5, present),
            Segment::new(1, 5..10, dir.path().join("a.part1")),
        ];

        let err = merge_segments(&segments, &dir.path().join("a.part"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Merge { .. }));
    }
}
