// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 服务器进程配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 请求的分段数（实际分段数还受 min_segment_size 限制）
    #[serde(default = "default_segments")]
    pub segments: usize,
    /// 单个分段的最小字节数，避免小文件被切得过碎
    #[serde(default = "default_min_segment_size")]
    pub min_segment_size: u64,
    /// 建立连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单次 HTTP 请求超时（秒），作用于每个请求而非整个下载
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// User-Agent 请求头
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_segments() -> usize {
    16
}

fn default_min_segment_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("mc-server-launcher/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segments: default_segments(),
            min_segment_size: default_min_segment_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// 服务器进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器根目录（每个服务器一个子目录）
    #[serde(default = "default_servers_dir")]
    pub servers_dir: PathBuf,
    /// 指定 java 可执行文件；为空时依次尝试服务器目录内置 JRE 和 PATH
    #[serde(default)]
    pub java_path: Option<PathBuf>,
    /// 初始堆大小（-Xms）
    #[serde(default = "default_xms")]
    pub xms: String,
    /// 最大堆大小（-Xmx）
    #[serde(default = "default_xmx")]
    pub xmx: String,
    /// 额外 JVM 参数
    #[serde(default)]
    pub extra_jvm_args: Vec<String>,
    /// 优雅停止等待时长（秒）
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// 重连进程的存活轮询间隔（秒）
    #[serde(default = "default_reattach_poll_secs")]
    pub reattach_poll_secs: u64,
}

fn default_servers_dir() -> PathBuf {
    PathBuf::from("servers")
}

fn default_xms() -> String {
    "1G".to_string()
}

fn default_xmx() -> String {
    "4G".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    30
}

fn default_reattach_poll_secs() -> u64 {
    2
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            servers_dir: default_servers_dir(),
            java_path: None,
            xms: default_xms(),
            xmx: default_xmx(),
            extra_jvm_args: Vec::new(),
            stop_timeout_secs: default_stop_timeout_secs(),
            reattach_poll_secs: default_reattach_poll_secs(),
        }
    }
}

/// 校验 JVM 堆大小格式：数字 + 可选单位 K/M/G
fn is_valid_heap_size(value: &str) -> bool {
    let digits = value.trim_end_matches(|c: char| matches!(c, 'k' | 'K' | 'm' | 'M' | 'g' | 'G'));
    let suffix_len = value.len() - digits.len();
    suffix_len <= 1 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

impl AppConfig {
    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.download.segments == 0 {
            anyhow::bail!("download.segments 必须大于 0");
        }
        if self.download.min_segment_size == 0 {
            anyhow::bail!("download.min_segment_size 必须大于 0");
        }
        if self.server.stop_timeout_secs == 0 {
            anyhow::bail!("server.stop_timeout_secs 必须大于 0");
        }
        for (name, value) in [("xms", &self.server.xms), ("xmx", &self.server.xmx)] {
            if !is_valid_heap_size(value) {
                anyhow::bail!(
                    "server.{} 格式无效: {:?}（示例: 1024M、4G）",
                    name,
                    value
                );
            }
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建配置目录失败")?;
        }

        fs::write(path, content)
            .await
            .context("写入配置文件失败")?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载或使用默认配置
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.segments, 16);
        assert_eq!(config.server.stop_timeout_secs, 30);
        assert_eq!(config.server.xmx, "4G");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [download]
            segments = 4

            [server]
            xmx = "2048M"
            "#,
        )
        .unwrap();

        assert_eq!(config.download.segments, 4);
        assert_eq!(config.download.min_segment_size, 1024 * 1024);
        assert_eq!(config.server.xmx, "2048M");
        assert_eq!(config.server.xms, "1G");
        assert!(config.log.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.download.segments = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.xmx = "4 gigs".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.xms = "G".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heap_size_format() {
        assert!(is_valid_heap_size("1G"));
        assert!(is_valid_heap_size("512m"));
        assert!(is_valid_heap_size("1048576"));
        assert!(!is_valid_heap_size("1GG"));
        assert!(!is_valid_heap_size(""));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.toml");

        let mut config = AppConfig::default();
        config.download.segments = 8;
        config.server.extra_jvm_args = vec!["-XX:+UseG1GC".to_string()];
        config.save_to_file(&path).await.unwrap();

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.download.segments, 8);
        assert_eq!(loaded.server.extra_jvm_args, vec!["-XX:+UseG1GC".to_string()]);
    }

    #[tokio::test]
    async fn test_load_or_default_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("missing.toml")).await;
        assert_eq!(config.download.segments, 16);
    }
}
