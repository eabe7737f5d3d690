//! 服务器安装
//!
//! 一次安装依次完成：解析版本 → 下载服务器 jar（进度 0-40，已知 sha1 时校验）→
//! 安装对应主版本的 JRE 到 `<dir>/java`（40-100）→ 写入 `eula.txt` 和 `config.json`。
//! 任一步失败都会删除本次创建的目录

use super::eula::write_eula;
use super::java::JreInstaller;
use super::kinds::{JarSource, ResolvedJar, ServerKind};
use super::metadata::ServerMetadata;
use super::servers::unique_server_name;
use crate::context::LauncherContext;
use crate::downloader::{DownloadTask, ProgressReporter, SegmentedDownloader};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 版本参数为该值时安装最新正式版
pub const LATEST: &str = "latest";

/// jar 下载在总进度中的终点，其余留给 JRE
const JAR_WEIGHT: u8 = 40;

/// 安装选项
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// 目标目录；None 时在 `servers_dir` 下按 `<type>-<version>[-N]` 自动命名
    pub dir: Option<PathBuf>,
    pub accept_eula: bool,
    /// 不安装 JRE（使用配置或 PATH 中的 java）
    pub skip_java: bool,
}

/// 安装结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledServer {
    pub name: String,
    pub kind: ServerKind,
    pub version: String,
    pub dir: PathBuf,
    pub jar_file: String,
    pub size: u64,
    pub java_major: Option<u32>,
    /// 安装的 java 可执行文件
    pub java: Option<PathBuf>,
    pub eula_accepted: bool,
}

/// 安装服务器
pub async fn install_server(
    ctx: &LauncherContext,
    kind: ServerKind,
    version: &str,
    options: &InstallOptions,
    reporter: &ProgressReporter,
) -> Result<InstalledServer> {
    let source = kind.jar_source(ctx);
    let jre = JreInstaller::for_context(ctx);
    install_from_source(ctx, source.as_ref(), &jre, version, options, reporter).await
}

/// 使用指定的 jar 来源和 JRE 安装器安装
pub async fn install_from_source(
    ctx: &LauncherContext,
    source: &dyn JarSource,
    jre: &JreInstaller,
    version: &str,
    options: &InstallOptions,
    reporter: &ProgressReporter,
) -> Result<InstalledServer> {
    let version = if version.eq_ignore_ascii_case(LATEST) {
        source.latest_version().await?
    } else {
        version.to_string()
    };

    let dir = match &options.dir {
        Some(dir) => dir.clone(),
        None => {
            let servers_dir = &ctx.config().server.servers_dir;
            servers_dir.join(unique_server_name(servers_dir, source.kind(), &version))
        }
    };
    ensure_empty_dir(&dir)?;

    let jar = source
        .resolve(&version)
        .await
        .with_context(|| format!("解析 {} {} 失败", source.kind(), version))?;

    let existed = dir.exists();
    fs::create_dir_all(&dir).with_context(|| format!("创建目录失败: {:?}", dir))?;

    info!("安装 {} {} -> {:?}", jar.kind, jar.version, dir);
    let result = install_into(ctx, jre, &jar, &dir, options, reporter).await;
    if result.is_err() {
        discard_dir(&dir, existed);
    }
    result
}

async fn install_into(
    ctx: &LauncherContext,
    jre: &JreInstaller,
    jar: &ResolvedJar,
    dir: &Path,
    options: &InstallOptions,
    reporter: &ProgressReporter,
) -> Result<InstalledServer> {
    let java_major = jar.java_major.filter(|_| !options.skip_java);
    let jar_reporter = match java_major {
        Some(_) => reporter.weighted(0, JAR_WEIGHT),
        None => reporter.clone(),
    };

    let mut task = DownloadTask::new(
        &jar.url,
        dir.join(&jar.file_name),
        ctx.config().download.segments,
    );
    if let Some(sha1) = &jar.sha1 {
        task = task.with_sha1(sha1);
    }
    let size = SegmentedDownloader::from_context(ctx)
        .download_task(&mut task, &jar_reporter)
        .await
        .with_context(|| format!("下载 {} 失败", jar.file_name))?;

    let java = match java_major {
        Some(major) => Some(
            jre.install(major, dir, &reporter.weighted(JAR_WEIGHT, 100))
                .await?,
        ),
        None => None,
    };

    if options.accept_eula {
        write_eula(dir, true).with_context(|| format!("写入 eula.txt 失败: {:?}", dir))?;
    }

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("{}-{}", jar.kind, jar.version));
    ServerMetadata {
        name: name.clone(),
        kind: jar.kind,
        version: jar.version.clone(),
        jar_file: jar.file_name.clone(),
        java_major: jar.java_major,
        created_at: Utc::now(),
    }
    .save(dir)?;

    Ok(InstalledServer {
        name,
        kind: jar.kind,
        version: jar.version.clone(),
        dir: dir.to_path_buf(),
        jar_file: jar.file_name.clone(),
        size,
        java_major: jar.java_major,
        java,
        eula_accepted: options.accept_eula,
    })
}

/// 目标目录必须不存在或为空
fn ensure_empty_dir(dir: &Path) -> Result<()> {
    match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                bail!("目标目录 {:?} 不为空，请选择新的目录", dir);
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) if dir.is_file() => bail!("目标路径 {:?} 是文件: {}", dir, e),
        Err(e) => Err(e).with_context(|| format!("无法读取目录 {:?}", dir)),
    }
}

/// 安装失败：删除本次创建的目录，原本就存在的空目录只清空
fn discard_dir(dir: &Path, existed: bool) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("清理安装目录失败: {:?}, {}", dir, e);
        return;
    }
    if existed {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("重建安装目录失败: {:?}, {}", dir, e);
        }
    }
    info!("安装失败，已清理目录 {:?}", dir);
}
