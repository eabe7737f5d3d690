// eula.txt 读写

use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const EULA_FILE: &str = "eula.txt";

const EULA_HEADER: &str = "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://aka.ms/MinecraftEULA).";

pub fn eula_path(server_dir: &Path) -> PathBuf {
    server_dir.join(EULA_FILE)
}

/// 是否已同意 EULA（文件不存在视为未同意）
pub fn eula_accepted(server_dir: &Path) -> bool {
    fs::read_to_string(eula_path(server_dir))
        .map(|content| parse_eula(&content).unwrap_or(false))
        .unwrap_or(false)
}

fn parse_eula(content: &str) -> Option<bool> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == "eula").then(|| value.trim().eq_ignore_ascii_case("true"))
        })
}

/// 写入 EULA 状态；已有文件时只替换 `eula=` 行，保留注释
pub fn write_eula(server_dir: &Path, accepted: bool) -> io::Result<()> {
    let path = eula_path(server_dir);
    let line = format!("eula={}", accepted);

    let content = match fs::read_to_string(&path) {
        Ok(existing) if parse_eula(&existing).is_some() => {
            let mut lines: Vec<String> = existing
                .lines()
                .map(|l| {
                    let trimmed = l.trim();
                    if !trimmed.starts_with('#') && trimmed.split('=').next().map(str::trim) == Some("eula") {
                        line.clone()
                    } else {
                        l.to_string()
                    }
                })
                .collect();
            lines.push(String::new());
            lines.join("\n")
        }
        Ok(_) | Err(_) => format!(
            "{}\n#{}\n{}\n",
            EULA_HEADER,
            Local::now().format("%a %b %d %H:%M:%S %Z %Y"),
            line
        ),
    };

    fs::write(&path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_eula_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert!(!eula_accepted(dir.path()));

        write_eula(dir.path(), true).unwrap();
        assert!(eula_accepted(dir.path()));
        let content = std::fs::read_to_string(eula_path(dir.path())).unwrap();
        assert!(content.starts_with("#By changing"));
        assert!(content.contains("eula=true"));

        write_eula(dir.path(), false).unwrap();
        assert!(!eula_accepted(dir.path()));
        let rewritten = std::fs::read_to_string(eula_path(dir.path())).unwrap();
        assert!(rewritten.starts_with("#By changing"));
        assert_eq!(rewritten.matches("eula=").count(), 1);
    }

    #[test]
    fn test_parse_eula() {
        assert_eq!(parse_eula("#eula=true\neula = TRUE\n"), Some(true));
        assert_eq!(parse_eula("eula=false"), Some(false));
        assert_eq!(parse_eula("# nothing"), None);
    }
}
