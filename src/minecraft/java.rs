//! JRE 安装
//!
//! 从 Adoptium 下载指定主版本的 JRE 并解压到服务器目录下的 `java/`。
//! 总进度：下载占 0-70，解压占 70-100。压缩包缓存在 `cache_dir`，已存在且完整时跳过下载

use crate::context::LauncherContext;
use crate::downloader::{DownloadTask, ProgressReporter, SegmentedDownloader};
use crate::process::launch::{bundled_java, BUNDLED_JAVA_DIR};
use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Adoptium API
pub const ADOPTIUM_API_URL: &str = "https://api.adoptium.net/v3";

/// 无法获取版本列表时使用的版本
pub const FALLBACK_RELEASES: &[u32] = &[8, 11, 17, 21];

/// `servers_dir` 下的 JRE 压缩包缓存目录
pub const JRE_CACHE_DIR: &str = ".cache";

/// 下载阶段在总进度中的终点
const DOWNLOAD_WEIGHT: u8 = 70;

#[derive(Debug, Deserialize)]
struct AvailableReleases {
    available_releases: Vec<u32>,
}

/// 压缩包格式（按文件头识别）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path).ok()?;
        file.read_exact(&mut magic).ok()?;
        match magic {
            [b'P', b'K', 0x03, 0x04] => Some(Self::Zip),
            [0x1f, 0x8b, _, _] => Some(Self::TarGz),
            _ => None,
        }
    }

    /// 当前平台 Adoptium 提供的格式
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            Self::Zip
        } else {
            Self::TarGz
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// Adoptium 的 (os, arch) 名称
pub fn adoptium_platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "mac",
        _ => "windows",
    };
    let arch = match std::env::consts::ARCH {
        "aarch64" => "aarch64",
        _ => "x64",
    };
    (os, arch)
}

/// JRE 安装器
pub struct JreInstaller {
    ctx: LauncherContext,
    api_base: String,
    cache_dir: PathBuf,
}

impl JreInstaller {
    pub fn new(ctx: &LauncherContext, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx: ctx.clone(),
            api_base: ADOPTIUM_API_URL.to_string(),
            cache_dir: cache_dir.into(),
        }
    }

    /// 缓存放在 `servers_dir/.cache`
    pub fn for_context(ctx: &LauncherContext) -> Self {
        Self::new(ctx, ctx.config().server.servers_dir.join(JRE_CACHE_DIR))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// 可用的 Java 主版本；请求失败时返回内置列表
    pub async fn available_releases(&self) -> Vec<u32> {
        let url = format!("{}/info/available_releases", self.api_base);
        let result: Result<AvailableReleases> = async {
            Ok(self
                .ctx
                .http()
                .get(&url)
                .timeout(self.ctx.request_timeout())
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?)
        }
        .await;

        match result {
            Ok(releases) => releases.available_releases,
            Err(e) => {
                warn!("获取 Java 版本列表失败，使用内置列表: {:#}", e);
                FALLBACK_RELEASES.to_vec()
            }
        }
    }

    pub fn download_url(&self, major: u32, os: &str, arch: &str) -> String {
        format!(
            "{}/binary/latest/{}/ga/{}/{}/jre/hotspot/normal/eclipse",
            self.api_base, major, os, arch
        )
    }

    /// 缓存的压缩包路径
    pub fn archive_path(&self, major: u32) -> PathBuf {
        self.cache_dir.join(format!(
            "OpenJRE{}.{}",
            major,
            ArchiveFormat::for_platform().extension()
        ))
    }

    /// 安装到 `<server_dir>/java`，返回 java 可执行文件路径
    pub async fn install(
        &self,
        major: u32,
        server_dir: &Path,
        reporter: &ProgressReporter,
    ) -> Result<PathBuf> {
        let releases = self.available_releases().await;
        if !releases.contains(&major) {
            bail!("Java {} 不受支持，可选版本: {:?}", major, releases);
        }

        let (os, arch) = adoptium_platform();
        let url = self.download_url(major, os, arch);
        let archive = self.archive_path(major);

        let mut task = DownloadTask::new(&url, &archive, self.ctx.config().download.segments);
        let download_reporter = reporter.weighted(0, DOWNLOAD_WEIGHT);

        let cached = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || is_valid_archive(&archive))
                .await
                .unwrap_or(false)
        };

        if cached {
            info!("使用已缓存的 JRE 压缩包: {:?}", archive);
            download_reporter.percent(&task.id, 100);
        } else {
            fs::create_dir_all(&self.cache_dir)
                .with_context(|| format!("创建缓存目录失败: {:?}", self.cache_dir))?;
            info!("下载 Java {} JRE: {}", major, url);
            SegmentedDownloader::from_context(&self.ctx)
                .download_task(&mut task, &download_reporter)
                .await
                .with_context(|| format!("下载 Java {} 失败", major))?;
        }

        let target = server_dir.join(BUNDLED_JAVA_DIR);
        let extract_reporter = reporter.weighted(DOWNLOAD_WEIGHT, 100);
        let task_id = task.id.clone();
        let extract_target = target.clone();
        tokio::task::spawn_blocking(move || {
            extract_archive(&archive, &extract_target, |local| {
                extract_reporter.percent(&task_id, local)
            })
        })
        .await
        .map_err(|e| anyhow!("解压任务异常退出: {}", e))??;

        let java = bundled_java(server_dir);
        if !java.is_file() {
            bail!("解压完成但未找到 java 可执行文件: {:?}", java);
        }
        info!("Java {} 已安装: {:?}", major, java);
        Ok(java)
    }
}

/// 压缩包是否完整可读
pub fn is_valid_archive(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match ArchiveFormat::detect(path) {
        Some(ArchiveFormat::Zip) => ZipArchive::new(file).is_ok(),
        Some(ArchiveFormat::TarGz) => tar::Archive::new(GzDecoder::new(file))
            .entries()
            .map(|entries| entries.into_iter().all(|entry| entry.is_ok()))
            .unwrap_or(false),
        None => false,
    }
}

/// 解压到 `dest`（先清空），只有一个顶层目录时将其内容上提一层，
/// macOS bundle 取 `Contents/Home`
///
/// `on_progress` 收到 0-100 的本地百分比
pub fn extract_archive(archive: &Path, dest: &Path, mut on_progress: impl FnMut(u8)) -> Result<()> {
    let format = ArchiveFormat::detect(archive)
        .ok_or_else(|| anyhow!("无法识别的压缩包格式: {:?}", archive))?;

    let staging = staging_dir(dest);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging).with_context(|| format!("创建目录失败: {:?}", staging))?;

    let result = match format {
        ArchiveFormat::Zip => extract_zip(archive, &staging, &mut on_progress),
        ArchiveFormat::TarGz => extract_tar_gz(archive, &staging, &mut on_progress),
    }
    .and_then(|()| flatten_into(&staging, dest));

    if let Err(e) = fs::remove_dir_all(&staging) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("清理临时解压目录失败: {:?}, {}", staging, e);
        }
    }
    result?;

    on_progress(100);
    Ok(())
}

fn staging_dir(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "java".to_string());
    dest.with_file_name(format!("{}_tmp", name))
}

fn extract_zip(archive: &Path, staging: &Path, on_progress: &mut impl FnMut(u8)) -> Result<()> {
    let mut zip = ZipArchive::new(File::open(archive)?).context("读取 zip 失败")?;
    let total = zip.len().max(1);

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("跳过不安全的路径: {}", entry.name());
            continue;
        };
        let out_path = staging.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
            apply_mode(&out_path, entry.unix_mode())?;
        }
        on_progress(((index + 1) * 100 / total) as u8);
    }
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

fn extract_tar_gz(archive: &Path, staging: &Path, on_progress: &mut impl FnMut(u8)) -> Result<()> {
    // 第一遍只数条目数，用于计算进度
    let total = tar::Archive::new(GzDecoder::new(File::open(archive)?))
        .entries()?
        .count()
        .max(1);

    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    for (index, entry) in tar.entries()?.enumerate() {
        let mut entry = entry.context("读取 tar 条目失败")?;
        // unpack_in 拒绝 `..` 和绝对路径，并保留权限位
        if !entry.unpack_in(staging)? {
            warn!("跳过不安全的路径: {:?}", entry.path().ok());
        }
        on_progress(((index + 1) * 100 / total).min(100) as u8);
    }
    Ok(())
}

/// 把 staging 中的内容移动到 dest
fn flatten_into(staging: &Path, dest: &Path) -> Result<()> {
    let items: Vec<PathBuf> = fs::read_dir(staging)?
        .flatten()
        .map(|entry| entry.path())
        .collect();

    let source_root = match items.as_slice() {
        [single] if single.is_dir() => {
            debug!("展平顶层目录: {:?}", single);
            single.clone()
        }
        _ => staging.to_path_buf(),
    };
    // macOS 的 JRE 包结构为 `<root>/Contents/Home/bin/java`
    let mac_home = source_root.join("Contents").join("Home");
    let source_root = if mac_home.join("bin").is_dir() {
        debug!("使用 macOS bundle 目录: {:?}", mac_home);
        mac_home
    } else {
        source_root
    };

    if dest.exists() {
        fs::remove_dir_all(dest).with_context(|| format!("删除旧目录失败: {:?}", dest))?;
    }
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(&source_root)?.flatten() {
        let target = dest.join(entry.file_name());
        fs::rename(entry.path(), &target)
            .with_context(|| format!("移动 {:?} 到 {:?} 失败", entry.path(), target))?;
    }
    Ok(())
}
