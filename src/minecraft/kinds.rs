//! 服务器类型表
//!
//! 类型标签到 jar 来源构造函数的静态映射。新增服务器类型时在 `index()` 和 `SERVER_KINDS` 中各补一处，漏写会在编译期报错

use super::fabric::FabricSource;
use super::paper::PaperSource;
use super::vanilla::VanillaSource;
use crate::context::LauncherContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 服务器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Vanilla,
    Paper,
    Fabric,
}

pub type SourceConstructor = fn(&LauncherContext) -> Box<dyn JarSource>;

/// (类型, 标签, 构造函数)
pub type KindRow = (ServerKind, &'static str, SourceConstructor);

fn vanilla_source(ctx: &LauncherContext) -> Box<dyn JarSource> {
    Box::new(VanillaSource::new(ctx))
}

fn paper_source(ctx: &LauncherContext) -> Box<dyn JarSource> {
    Box::new(PaperSource::new(ctx))
}

fn fabric_source(ctx: &LauncherContext) -> Box<dyn JarSource> {
    Box::new(FabricSource::new(ctx))
}

const KIND_TABLE: [KindRow; 3] = [
    (ServerKind::Vanilla, "vanilla", vanilla_source),
    (ServerKind::Paper, "paper", paper_source),
    (ServerKind::Fabric, "fabric", fabric_source),
];

// 每一行必须位于其类型的 index() 处，漏行或错位时编译失败
const _: () = {
    let mut i = 0;
    while i < KIND_TABLE.len() {
        assert!(KIND_TABLE[i].0.index() == i);
        i += 1;
    }
    assert!(KIND_TABLE.len() == ServerKind::COUNT);
};

/// 类型表，Vanilla 排在第一位作为默认
pub static SERVER_KINDS: [KindRow; 3] = KIND_TABLE;

impl ServerKind {
    const COUNT: usize = Self::Fabric.index() + 1;

    /// 在 `SERVER_KINDS` 中的行号；新增类型时这里的 match 会强制补上
    const fn index(self) -> usize {
        match self {
            Self::Vanilla => 0,
            Self::Paper => 1,
            Self::Fabric => 2,
        }
    }

    fn row(self) -> &'static KindRow {
        &SERVER_KINDS[self.index()]
    }

    pub fn all() -> impl Iterator<Item = ServerKind> {
        SERVER_KINDS.iter().map(|(kind, _, _)| *kind)
    }

    pub fn tag(&self) -> &'static str {
        self.row().1
    }

    /// 按标签查找（不区分大小写）
    pub fn from_tag(tag: &str) -> Option<Self> {
        SERVER_KINDS
            .iter()
            .find(|(_, t, _)| t.eq_ignore_ascii_case(tag.trim()))
            .map(|(kind, _, _)| *kind)
    }

    /// 构造该类型的 jar 来源
    pub fn jar_source(&self, ctx: &LauncherContext) -> Box<dyn JarSource> {
        (self.row().2)(ctx)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ServerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| {
            let tags: Vec<&str> = SERVER_KINDS.iter().map(|(_, tag, _)| *tag).collect();
            format!("未知的服务器类型 {:?}，可选: {}", s, tags.join(", "))
        })
    }
}

/// 版本列表项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    /// release / snapshot / ...
    pub kind: String,
    /// YYYY-MM-DD
    pub release_date: Option<String>,
}

/// 解析后的服务器 jar 下载信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJar {
    pub kind: ServerKind,
    pub version: String,
    pub url: String,
    /// 保存到服务器目录时使用的文件名
    pub file_name: String,
    pub sha1: Option<String>,
    /// 需要的 Java 主版本
    pub java_major: Option<u32>,
}

/// 服务器 jar 来源
#[async_trait]
pub trait JarSource: Send + Sync {
    fn kind(&self) -> ServerKind;

    /// 版本列表（新版本在前）
    async fn list_versions(&self, include_snapshots: bool) -> Result<Vec<VersionEntry>>;

    /// 最新正式版
    async fn latest_version(&self) -> Result<String>;

    async fn resolve(&self, version: &str) -> Result<ResolvedJar>;
}

/// GET 并解析 JSON
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<T> {
    client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("请求失败: {}", url))?
        .error_for_status()
        .with_context(|| format!("服务器返回错误: {}", url))?
        .json::<T>()
        .await
        .with_context(|| format!("解析响应失败: {}", url))
}

/// 按 Minecraft 版本推断所需 Java 主版本（元数据未提供时使用）
pub fn java_major_for(version: &str) -> u32 {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(1);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    match (major, minor, patch) {
        (1, m, _) if m >= 21 => 21,
        (1, 20, p) if p >= 5 => 21,
        (1, m, _) if m >= 18 => 17,
        (1, 17, _) => 16,
        (1, _, _) => 8,
        // 新版本号格式（如 25.1）
        _ => 21,
    }
}
