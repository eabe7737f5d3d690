//! 服务器状态文件
//!
//! 每个服务器目录一个 `.server_status.json`，记录本启动器拉起的服务器进程，
//! 启动器重启后据此重新连接仍在运行的服务器。
//!
//! ```json
//! {"pid": 12345, "status": "running", "started_at": "2025-01-01T00:00:00Z", "jar_file": "Vanilla-1.21.jar"}
//! ```

use super::error::{ProcessError, ProcessResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 状态文件名
pub const STATUS_FILE_NAME: &str = ".server_status.json";

const STATUS_RUNNING: &str = "running";

/// 持久化的进程记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub pid: u32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub jar_file: String,
}

impl StatusRecord {
    pub fn running(pid: u32, jar_file: impl Into<String>) -> Self {
        Self {
            pid,
            status: STATUS_RUNNING.to_string(),
            started_at: Utc::now(),
            jar_file: jar_file.into(),
        }
    }
}

/// 状态文件读写
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(server_dir: &Path) -> Self {
        Self {
            path: server_dir.join(STATUS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> ProcessError {
        ProcessError::StatusStore {
            path: self.path.clone(),
            source,
        }
    }

    /// 保存记录（先写临时文件再原子重命名）
    pub fn save(&self, record: &StatusRecord) -> ProcessResult<()> {
        let temp_path = self.path.with_extension("json.tmp");

        let file = File::create(&temp_path).map_err(|e| self.io_error(e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)
            .map_err(|e| self.io_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        writer.flush().map_err(|e| self.io_error(e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;

        debug!("已保存状态文件: {:?} (pid={})", self.path, record.pid);
        Ok(())
    }

    /// 读取记录
    ///
    /// - 文件不存在: `Ok(None)`
    /// - 文件损坏: `Err(ProcessError::Reattach)`，由调用方决定是否删除
    pub fn load(&self) -> ProcessResult<Option<StatusRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let record: StatusRecord =
            serde_json::from_str(&content).map_err(|e| ProcessError::Reattach {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if record.status != STATUS_RUNNING {
            return Err(ProcessError::Reattach {
                path: self.path.clone(),
                reason: format!("未知状态 {:?}", record.status),
            });
        }
        Ok(Some(record))
    }

    /// 删除记录（不存在视为成功）
    pub fn clear(&self) -> ProcessResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("已删除状态文件: {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let record = StatusRecord::running(4242, "Vanilla-1.21.jar");
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
        assert!(!dir.path().join(".server_status.json.tmp").exists());

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_reads_external_schema() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(STATUS_FILE_NAME),
            r#"{"pid": 77, "status": "running", "started_at": "2025-03-01T08:30:00Z", "jar_file": "paper-1.21-100.jar"}"#,
        )
        .unwrap();

        let record = StatusStore::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(record.pid, 77);
        assert_eq!(record.jar_file, "paper-1.21-100.jar");
    }

    #[test]
    fn test_corrupt_file_is_reattach_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATUS_FILE_NAME), "{not json").unwrap();

        let err = StatusStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, ProcessError::Reattach { .. }));
    }
}
