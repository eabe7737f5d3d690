use super::error::{DownloadError, DownloadResult};
use super::events::DownloadEvent;
use super::integrity::verify_sha1;
use super::progress::ProgressReporter;
use super::segment::CHUNK_SIZE;
use super::task::DownloadTask;
use super::temp::TempFileGuard;
use crate::context::LauncherContext;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::{fs, fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 单线程流式下载
///
/// 既是分段下载的回退路径，也可直接用于小文件
#[derive(Debug, Clone)]
pub struct SingleStreamDownloader {
    client: Client,
    timeout: Duration,
}

impl SingleStreamDownloader {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_context(ctx: &LauncherContext) -> Self {
        Self::new(ctx.http().clone(), ctx.request_timeout())
    }

    /// 下载 `url` 到 `dest`
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        reporter: &ProgressReporter,
    ) -> DownloadResult<u64> {
        let mut task = DownloadTask::new(url, dest, 1);
        self.download_task(&mut task, reporter, &CancellationToken::new())
            .await
    }

    /// 下载任务（已知大小时上报进度，未知时不上报）
    pub async fn download_task(
        &self,
        task: &mut DownloadTask,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let result = self.transfer(task, reporter, cancel).await;
        match &result {
            Ok(size) => reporter.emit(DownloadEvent::Completed {
                task_id: task.id.clone(),
                path: task.dest.display().to_string(),
                size: *size,
            }),
            Err(e) => {
                warn!("单线程下载失败: task={}, error={}", task.id, e);
                reporter.emit(DownloadEvent::Failed {
                    task_id: task.id.clone(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn transfer(
        &self,
        task: &mut DownloadTask,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let resp = self
            .client
            .get(&task.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::Stream {
                url: task.url.clone(),
                reason: format!("发送请求失败: {}", e),
            })?;

        if !resp.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: task.url.clone(),
                status: resp.status().as_u16(),
            });
        }

        // GET 响应中的长度优先于探测结果
        let total = resp.content_length().or(task.total_size).filter(|t| *t > 0);
        task.total_size = total;

        info!(
            "开始单线程下载: {} -> {:?}, size={:?}",
            task.url, task.dest, total
        );
        reporter.emit(DownloadEvent::Started {
            task_id: task.id.clone(),
            url: task.url.clone(),
            total_size: total,
            segments: 1,
        });

        let staging = task.staging_path();
        let mut guard = TempFileGuard::new();
        guard.track(&staging);

        let mut file = File::create(&staging)
            .await
            .map_err(|e| DownloadError::disk(&staging, e))?;
        let mut stream = resp.bytes_stream();
        let mut downloaded = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else { break };
            let data = item.map_err(|e| DownloadError::Stream {
                url: task.url.clone(),
                reason: format!("读取数据流失败: {}", e),
            })?;

            for piece in data.chunks(CHUNK_SIZE) {
                file.write_all(piece)
                    .await
                    .map_err(|e| DownloadError::disk(&staging, e))?;
                downloaded += piece.len() as u64;
                if let Some(total) = total {
                    reporter.progress(&task.id, downloaded.min(total), total);
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::disk(&staging, e))?;
        drop(file);

        if let Some(total) = total {
            if downloaded != total {
                return Err(DownloadError::Stream {
                    url: task.url.clone(),
                    reason: format!("响应体长度不符: 收到 {} / {} 字节", downloaded, total),
                });
            }
        }

        if let Some(expected) = &task.sha1 {
            verify_sha1(&staging, expected).await?;
        }

        fs::rename(&staging, &task.dest)
            .await
            .map_err(|e| DownloadError::disk(&task.dest, e))?;

        info!("单线程下载完成: {:?} ({} bytes)", task.dest, downloaded);
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::events::download_event_channel;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_single_stream_download() {
        let server = MockServer::start().await;
        let data = body(200_000);
        Mock::given(method("GET"))
            .and(path("/jre.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("jre.zip");
        let (tx, mut rx) = download_event_channel();
        let downloader = SingleStreamDownloader::new(Client::new(), Duration::from_secs(10));

        let size = downloader
            .download(
                &format!("{}/jre.zip", server.uri()),
                &dest,
                &ProgressReporter::new(tx),
            )
            .await
            .unwrap();

        assert_eq!(size, 200_000);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(!dir.path().join("jre.zip.part").exists());

        let mut percents = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                DownloadEvent::Progress { progress, .. } => {
                    assert!(!completed, "完成后不应再有进度");
                    percents.push(progress);
                }
                DownloadEvent::Completed { .. } => completed = true,
                _ => {}
            }
        }
        assert!(completed);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last().copied(), Some(100));
    }

    #[tokio::test]
    async fn test_single_stream_http_error_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let downloader = SingleStreamDownloader::new(Client::new(), Duration::from_secs(10));
        let err = downloader
            .download(&server.uri(), &dest, &ProgressReporter::silent())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_single_stream_sha1_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("server.jar");
        let downloader = SingleStreamDownloader::new(Client::new(), Duration::from_secs(10));
        let mut task = DownloadTask::new(server.uri(), &dest, 1).with_sha1("00");
        let err = downloader
            .download_task(&mut task, &ProgressReporter::silent(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Integrity { .. }));
        assert!(!dest.exists());
        assert!(!task.staging_path().exists());
    }
}
