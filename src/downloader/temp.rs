//! 临时文件守卫
//!
//! 登记下载过程中产生的 `.part*` 文件，守卫被丢弃时尽力删除，
//! 保证成功、失败、取消、panic 任一路径都不会残留临时文件

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TempFileGuard {
    paths: Vec<PathBuf>,
}

impl TempFileGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个临时文件
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }

    /// 立即删除所有已登记的文件
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            remove_quietly(&path);
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("已删除临时文件: {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除临时文件失败: {:?}, 错误: {}", path, e),
    }
}
