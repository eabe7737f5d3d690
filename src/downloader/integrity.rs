// 下载文件完整性校验

use super::error::{DownloadError, DownloadResult};
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};

/// 计算文件 SHA-1（小写十六进制）
pub async fn file_sha1(path: &Path) -> DownloadResult<String> {
    let mut file = File::open(path)
        .await
        .map_err(|e| DownloadError::disk(path, e))?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| DownloadError::disk(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 校验文件 SHA-1
pub async fn verify_sha1(path: &Path, expected: &str) -> DownloadResult<()> {
    let actual = file_sha1(path).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DownloadError::Integrity {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_sha1() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_sha1(&path).await.unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert!(verify_sha1(&path, "A9993E364706816ABA3E25717850C26C9CD0D89D")
            .await
            .is_ok());
        assert!(verify_sha1(&path, "deadbeef").await.is_err());
    }
}
