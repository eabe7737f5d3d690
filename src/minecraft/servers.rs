//! `servers_dir` 下的服务器目录

use super::kinds::ServerKind;
use super::metadata::ServerMetadata;
use crate::process::{ReconnectedProcess, StatusStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一个服务器目录
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub name: String,
    pub dir: PathBuf,
    /// 没有 `config.json` 或无法解析时为 None
    pub metadata: Option<ServerMetadata>,
    /// 状态文件指向的存活进程
    pub running_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// 列出所有服务器目录，新建的在前
///
/// 跳过以 `.` 开头的目录（JRE 缓存等）；`servers_dir` 不存在时返回空列表
pub fn list_servers(servers_dir: &Path) -> Result<Vec<ServerEntry>> {
    let entries = match fs::read_dir(servers_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("无法读取目录 {:?}", servers_dir)),
    };

    let mut servers: Vec<ServerEntry> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                return None;
            }
            Some(read_entry(name, entry.path()))
        })
        .collect();

    servers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
    Ok(servers)
}

fn read_entry(name: String, dir: PathBuf) -> ServerEntry {
    let metadata = ServerMetadata::load(&dir).unwrap_or_else(|e| {
        warn!("{:#}", e);
        None
    });

    let running_pid = StatusStore::new(&dir)
        .load()
        .ok()
        .flatten()
        .filter(|record| ReconnectedProcess::attach(record).is_some())
        .map(|record| record.pid);

    let created_at = match &metadata {
        Some(metadata) => metadata.created_at,
        None => fs::metadata(&dir)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
    };

    ServerEntry {
        name,
        dir,
        metadata,
        running_pid,
        created_at,
    }
}

/// 不与现有目录重名的服务器名：`<type>-<version>`，冲突时追加 `-1`、`-2` ...
pub fn unique_server_name(servers_dir: &Path, kind: ServerKind, version: &str) -> String {
    let base = format!("{}-{}", kind.tag(), version);
    let mut name = base.clone();
    let mut index = 1;
    while servers_dir.join(&name).exists() {
        name = format!("{}-{}", base, index);
        index += 1;
    }
    name
}
