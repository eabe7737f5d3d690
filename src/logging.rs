//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化。文件按启动时间命名、按大小滚动，
//! 启动时清理超过保留天数的旧日志。

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "mc-launcher.";

/// 日志文件名后缀
const LOG_FILE_SUFFIX: &str = ".log";

/// 时间戳格式
const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 按大小滚动的日志文件写入器
struct RollingFile {
    /// 启动时间戳（YYYY-MM-DD-HHMMSS），同一次运行的所有文件共用
    stamp: String,
    dir: PathBuf,
    file: Option<File>,
    /// 0 为首个文件，之后每次滚动加 1
    index: u32,
    max_size: u64,
    written: u64,
}

impl RollingFile {
    fn open(dir: PathBuf, max_size: u64) -> io::Result<Self> {
        let mut rolling = Self {
            stamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            dir,
            file: None,
            index: 0,
            max_size,
            written: 0,
        };
        rolling.open_current()?;
        Ok(rolling)
    }

    fn path_for(&self, index: u32) -> PathBuf {
        let name = if index == 0 {
            format!("{}{}{}", LOG_FILE_PREFIX, self.stamp, LOG_FILE_SUFFIX)
        } else {
            format!("{}{}_{}{}", LOG_FILE_PREFIX, self.stamp, index, LOG_FILE_SUFFIX)
        };
        self.dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(self.index))?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn write_buf(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，避免单条超大日志导致无限滚动
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            if let Some(mut old) = self.file.take() {
                old.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 线程安全的滚动日志写入器，交给 tracing-appender 的后台线程使用
#[derive(Clone)]
pub struct RollingFileWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl RollingFileWriter {
    pub fn new(dir: PathBuf, max_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(dir, max_size)?)),
        })
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write_buf(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush_buf()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。日志目录不可用时回退到仅控制台输出。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    let writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingFileWriter::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| {
                eprintln!(
                    "初始化日志文件失败: {:?}, 错误: {}，回退到仅控制台输出",
                    config.log_dir, e
                );
            })
            .ok()
    } else {
        None
    };

    let Some(writer) = writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理过期日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(LOG_FILE_SUFFIX)
        {
            continue;
        }

        let expired = match date_from_filename(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => false,
        };

        if expired {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!("已删除过期日志文件: {:?}", path);
                }
                Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
            }
        }
    }
    removed
}

/// 从 `mc-launcher.YYYY-MM-DD-HHMMSS[_N].log` 中取出日期
fn date_from_filename(filename: &str) -> Option<chrono::NaiveDate> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let date = stem.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_date_from_filename() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(date_from_filename("mc-launcher.2025-03-09-101500.log"), Some(date));
        assert_eq!(date_from_filename("mc-launcher.2025-03-09-101500_3.log"), Some(date));
        assert_eq!(date_from_filename("other.2025-03-09.log"), None);
        assert_eq!(date_from_filename("mc-launcher.garbage.log"), None);
    }

    #[test]
    fn test_rolling_writer_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let mut writer = RollingFileWriter::new(dir.path().to_path_buf(), 16).unwrap();

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();

        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cleanup_removes_only_expired_logs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mc-launcher.2000-01-01-000000.log"), b"old").unwrap();
        let today = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        fs::write(dir.path().join(format!("mc-launcher.{}.log", today)), b"new").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 7), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
