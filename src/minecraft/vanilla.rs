use super::kinds::{get_json, JarSource, ResolvedJar, ServerKind, VersionEntry};
use crate::context::LauncherContext;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Mojang 版本清单
pub const VANILLA_MANIFEST_URL: &str =
    "https://launchermeta.mojang.com/mc/game/version_manifest.json";

#[derive(Debug, Clone, Deserialize)]
struct VersionManifest {
    latest: LatestVersions,
    versions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct LatestVersions {
    release: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(rename = "releaseTime")]
    release_time: String,
}

#[derive(Debug, Deserialize)]
struct VersionDetail {
    downloads: Downloads,
    #[serde(rename = "javaVersion")]
    java_version: Option<JavaVersion>,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    server: Option<DownloadInfo>,
}

#[derive(Debug, Deserialize)]
struct DownloadInfo {
    url: String,
    sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JavaVersion {
    #[serde(rename = "majorVersion")]
    major_version: u32,
}

/// 官方原版服务器
///
/// 版本清单在首次使用时拉取并缓存
pub struct VanillaSource {
    client: Client,
    timeout: Duration,
    manifest_url: String,
    manifest: OnceCell<VersionManifest>,
}

impl VanillaSource {
    pub fn new(ctx: &LauncherContext) -> Self {
        Self::with_manifest_url(ctx.http().clone(), ctx.request_timeout(), VANILLA_MANIFEST_URL)
    }

    pub fn with_manifest_url(client: Client, timeout: Duration, manifest_url: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            manifest_url: manifest_url.into(),
            manifest: OnceCell::new(),
        }
    }

    async fn manifest(&self) -> Result<&VersionManifest> {
        self.manifest
            .get_or_try_init(|| async {
                debug!("拉取版本清单: {}", self.manifest_url);
                get_json::<VersionManifest>(&self.client, &self.manifest_url, self.timeout).await
            })
            .await
    }

    /// jar 文件名
    pub fn file_name(version: &str) -> String {
        format!("Vanilla-{}.jar", version)
    }
}

#[async_trait]
impl JarSource for VanillaSource {
    fn kind(&self) -> ServerKind {
        ServerKind::Vanilla
    }

    async fn list_versions(&self, include_snapshots: bool) -> Result<Vec<VersionEntry>> {
        let manifest = self.manifest().await?;
        Ok(manifest
            .versions
            .iter()
            .filter(|v| include_snapshots || v.kind == "release")
            .map(|v| VersionEntry {
                id: v.id.clone(),
                kind: v.kind.clone(),
                release_date: v.release_time.get(..10).map(str::to_string),
            })
            .collect())
    }

    async fn latest_version(&self) -> Result<String> {
        Ok(self.manifest().await?.latest.release.clone())
    }

    async fn resolve(&self, version: &str) -> Result<ResolvedJar> {
        let manifest = self.manifest().await?;
        let entry = manifest
            .versions
            .iter()
            .find(|v| v.id == version)
            .ok_or_else(|| anyhow!("版本 {} 不存在", version))?;

        let detail: VersionDetail = get_json(&self.client, &entry.url, self.timeout).await?;
        let server = detail
            .downloads
            .server
            .ok_or_else(|| anyhow!("版本 {} 没有提供服务器端下载", version))?;

        Ok(ResolvedJar {
            kind: ServerKind::Vanilla,
            version: version.to_string(),
            url: server.url,
            file_name: Self::file_name(version),
            sha1: server.sha1.map(|s| s.to_ascii_lowercase()),
            java_major: detail.java_version.map(|j| j.major_version),
        })
    }
}
