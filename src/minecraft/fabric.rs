use super::kinds::{get_json, java_major_for, JarSource, ResolvedJar, ServerKind, VersionEntry};
use crate::context::LauncherContext;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Fabric meta API
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2";

#[derive(Debug, Deserialize)]
struct GameVersion {
    version: String,
    stable: bool,
}

#[derive(Debug, Deserialize)]
struct ComponentVersion {
    version: String,
    stable: bool,
}

/// Fabric 服务器启动器 jar（使用最新稳定的 loader 和 installer）
///
/// 首次运行时由它下载对应版本的原版服务器
pub struct FabricSource {
    client: Client,
    timeout: Duration,
    meta_base: String,
}

impl FabricSource {
    pub fn new(ctx: &LauncherContext) -> Self {
        Self::with_meta_base(ctx.http().clone(), ctx.request_timeout(), FABRIC_META_URL)
    }

    pub fn with_meta_base(client: Client, timeout: Duration, meta_base: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            meta_base: meta_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn file_name(version: &str, loader: &str, installer: &str) -> String {
        format!(
            "fabric-server-mc.{}-loader.{}-launcher.{}.jar",
            version, loader, installer
        )
    }

    async fn game_versions(&self) -> Result<Vec<GameVersion>> {
        let url = format!("{}/versions/game", self.meta_base);
        get_json(&self.client, &url, self.timeout).await
    }

    /// 最新稳定版组件（loader / installer）
    async fn latest_stable(&self, component: &str) -> Result<String> {
        let url = format!("{}/versions/{}", self.meta_base, component);
        let versions: Vec<ComponentVersion> = get_json(&self.client, &url, self.timeout).await?;
        versions
            .into_iter()
            .find(|v| v.stable)
            .map(|v| v.version)
            .ok_or_else(|| anyhow!("Fabric 没有稳定的 {} 版本", component))
    }
}

#[async_trait]
impl JarSource for FabricSource {
    fn kind(&self) -> ServerKind {
        ServerKind::Fabric
    }

    async fn list_versions(&self, include_snapshots: bool) -> Result<Vec<VersionEntry>> {
        Ok(self
            .game_versions()
            .await?
            .into_iter()
            .filter(|v| include_snapshots || v.stable)
            .map(|v| VersionEntry {
                kind: if v.stable { "release" } else { "snapshot" }.to_string(),
                id: v.version,
                release_date: None,
            })
            .collect())
    }

    async fn latest_version(&self) -> Result<String> {
        self.game_versions()
            .await?
            .into_iter()
            .find(|v| v.stable)
            .map(|v| v.version)
            .ok_or_else(|| anyhow!("Fabric 没有可用版本"))
    }

    async fn resolve(&self, version: &str) -> Result<ResolvedJar> {
        if !self.game_versions().await?.iter().any(|v| v.version == version) {
            bail!("Fabric 不支持版本 {}", version);
        }
        let loader = self.latest_stable("loader").await?;
        let installer = self.latest_stable("installer").await?;

        Ok(ResolvedJar {
            kind: ServerKind::Fabric,
            version: version.to_string(),
            url: format!(
                "{}/versions/loader/{}/{}/{}/server/jar",
                self.meta_base, version, loader, installer
            ),
            file_name: Self::file_name(version, &loader, &installer),
            sha1: None,
            java_major: Some(java_major_for(version)),
        })
    }
}
