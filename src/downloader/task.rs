use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 下载任务
///
/// 每次下载调用创建一个，调用结束即销毁。`total_size` 与 `accept_ranges` 在探测后填充
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    /// 任务ID（事件通道中标识该任务）
    pub id: String,
    /// 下载地址
    pub url: String,
    /// 本地保存路径
    pub dest: PathBuf,
    /// 文件大小（探测前未知）
    pub total_size: Option<u64>,
    /// 服务器是否支持 Range 请求
    pub accept_ranges: bool,
    /// 分段数（创建时为请求值，探测后为实际值）
    pub segment_count: usize,
    /// 期望的 SHA-1（小写十六进制），为空时不校验
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, segment_count: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            dest: dest.into(),
            total_size: None,
            accept_ranges: false,
            segment_count: segment_count.max(1),
            sha1: None,
        }
    }

    /// 设置下载完成后的 SHA-1 校验值
    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into().to_ascii_lowercase());
        self
    }

    /// 使用指定任务ID（例如安装流程复用外层任务ID）
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 第 `index` 个分段的临时文件：`<dest>.part<index>`
    pub fn segment_path(&self, index: usize) -> PathBuf {
        append_suffix(&self.dest, &format!(".part{}", index))
    }

    /// 组装中的临时文件：`<dest>.part`，完成后原子重命名为 `dest`
    pub fn staging_path(&self) -> PathBuf {
        append_suffix(&self.dest, ".part")
    }
}

/// 在文件名后追加后缀（不替换原扩展名）
fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
