//! 服务器元数据
//!
//! 安装时写入服务器目录下的 `config.json`，启动时据此选择 jar。
//!
//! ```json
//! {"name": "vanilla-1.21.1", "server.type": "vanilla", "server.version": "1.21.1",
//!  "server.jar": "Vanilla-1.21.1.jar", "java.version": 21, "created_at": "2025-01-01T00:00:00Z"}
//! ```

use super::kinds::ServerKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    #[serde(rename = "server.type")]
    pub kind: ServerKind,
    #[serde(rename = "server.version")]
    pub version: String,
    #[serde(rename = "server.jar")]
    pub jar_file: String,
    /// 需要的 Java 主版本
    #[serde(rename = "java.version", default, skip_serializing_if = "Option::is_none")]
    pub java_major: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ServerMetadata {
    pub fn path(server_dir: &Path) -> PathBuf {
        server_dir.join(METADATA_FILE)
    }

    /// 读取元数据；文件不存在返回 None
    pub fn load(server_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(server_dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("读取服务器元数据失败: {:?}", path)),
        };
        let metadata = serde_json::from_str(&content)
            .with_context(|| format!("服务器元数据格式错误: {:?}", path))?;
        Ok(Some(metadata))
    }

    /// 原子写入（临时文件 + rename）
    pub fn save(&self, server_dir: &Path) -> Result<()> {
        let path = Self::path(server_dir);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self).context("序列化服务器元数据失败")?;
        fs::write(&tmp, content).with_context(|| format!("写入失败: {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("重命名失败: {:?} -> {:?}", tmp, path))?;
        Ok(())
    }

    /// jar 是否仍在目录中
    pub fn jar_exists(&self, server_dir: &Path) -> bool {
        server_dir.join(&self.jar_file).is_file()
    }
}
