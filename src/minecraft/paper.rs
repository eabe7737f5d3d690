use super::kinds::{get_json, java_major_for, JarSource, ResolvedJar, ServerKind, VersionEntry};
use crate::context::LauncherContext;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// PaperMC 项目 API
pub const PAPER_API_URL: &str = "https://api.papermc.io/v2/projects/paper";

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    /// 旧版本在前
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    builds: Vec<u32>,
}

/// Paper 服务器（取指定版本的最新构建）
pub struct PaperSource {
    client: Client,
    timeout: Duration,
    api_base: String,
}

impl PaperSource {
    pub fn new(ctx: &LauncherContext) -> Self {
        Self::with_api_base(ctx.http().clone(), ctx.request_timeout(), PAPER_API_URL)
    }

    pub fn with_api_base(client: Client, timeout: Duration, api_base: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn file_name(version: &str, build: u32) -> String {
        format!("paper-{}-{}.jar", version, build)
    }

    /// 预发布版本（1.21-pre1 / 1.20.5-rc1 等）
    fn is_prerelease(version: &str) -> bool {
        version.contains('-')
    }
}

#[async_trait]
impl JarSource for PaperSource {
    fn kind(&self) -> ServerKind {
        ServerKind::Paper
    }

    async fn list_versions(&self, include_snapshots: bool) -> Result<Vec<VersionEntry>> {
        let project: ProjectInfo = get_json(&self.client, &self.api_base, self.timeout).await?;
        Ok(project
            .versions
            .into_iter()
            .rev()
            .filter(|v| include_snapshots || !Self::is_prerelease(v))
            .map(|id| VersionEntry {
                kind: if Self::is_prerelease(&id) { "snapshot" } else { "release" }.to_string(),
                id,
                release_date: None,
            })
            .collect())
    }

    async fn latest_version(&self) -> Result<String> {
        self.list_versions(false)
            .await?
            .into_iter()
            .next()
            .map(|v| v.id)
            .ok_or_else(|| anyhow!("Paper 没有可用版本"))
    }

    async fn resolve(&self, version: &str) -> Result<ResolvedJar> {
        let url = format!("{}/versions/{}", self.api_base, version);
        let info: VersionInfo = get_json(&self.client, &url, self.timeout)
            .await
            .map_err(|e| anyhow!("Paper 版本 {} 不存在或无法访问: {:#}", version, e))?;
        let build = info
            .builds
            .last()
            .copied()
            .ok_or_else(|| anyhow!("Paper {} 没有可用构建", version))?;

        let file_name = Self::file_name(version, build);
        Ok(ResolvedJar {
            kind: ServerKind::Paper,
            version: version.to_string(),
            url: format!(
                "{}/versions/{}/builds/{}/downloads/{}",
                self.api_base, version, build, file_name
            ),
            file_name,
            sha1: None,
            java_major: Some(java_major_for(version)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/paper"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project_id": "paper",
                "versions": ["1.20.4", "1.21-pre1", "1.21", "1.21.1"]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paper/versions/1.21.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "1.21.1",
                "builds": [1, 2, 130]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/paper/versions/9.9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    fn source(server: &MockServer) -> PaperSource {
        PaperSource::with_api_base(
            Client::new(),
            Duration::from_secs(5),
            format!("{}/paper", server.uri()),
        )
    }

    #[tokio::test]
    async fn test_versions_newest_first() {
        let server = MockServer::start().await;
        mount(&server).await;
        let source = source(&server);

        let ids: Vec<String> = source
            .list_versions(false)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["1.21.1", "1.21", "1.20.4"]);
        assert_eq!(source.list_versions(true).await.unwrap().len(), 4);
        assert_eq!(source.latest_version().await.unwrap(), "1.21.1");
    }

    #[tokio::test]
    async fn test_resolve_latest_build() {
        let server = MockServer::start().await;
        mount(&server).await;
        let source = source(&server);

        let jar = source.resolve("1.21.1").await.unwrap();
        assert_eq!(jar.file_name, "paper-1.21.1-130.jar");
        assert_eq!(
            jar.url,
            format!(
                "{}/paper/versions/1.21.1/builds/130/downloads/paper-1.21.1-130.jar",
                server.uri()
            )
        );
        assert_eq!(jar.java_major, Some(21));
        assert!(source.resolve("9.9").await.is_err());
    }
}
