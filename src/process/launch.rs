//! 启动参数
//!
//! Java 可执行文件查找顺序：配置的 `java_path` → 服务器目录下的 `java/bin/java`
//! （JRE 安装器放置的位置）→ PATH 中的 `java`

use crate::config::ServerConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// 服务器目录下捆绑 JRE 的位置
pub const BUNDLED_JAVA_DIR: &str = "java";

#[cfg(windows)]
const JAVA_BIN: &str = "java.exe";
#[cfg(not(windows))]
const JAVA_BIN: &str = "java";

/// 一次启动所需的全部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// 工作目录（服务器安装目录）
    pub working_dir: PathBuf,
    /// 写入状态文件的 jar 名称
    pub jar_file: String,
    /// 启动前需要存在的文件
    pub required_file: Option<PathBuf>,
}

impl LaunchSpec {
    /// `java -Xms -Xmx [extra] -jar <jar> nogui`
    pub fn java(config: &ServerConfig, server_dir: &Path, jar_file: &str) -> Self {
        let mut args = vec![format!("-Xms{}", config.xms), format!("-Xmx{}", config.xmx)];
        args.extend(config.extra_jvm_args.iter().cloned());
        args.push("-jar".to_string());
        args.push(jar_file.to_string());
        args.push("nogui".to_string());

        Self {
            program: resolve_java(config, server_dir),
            args,
            working_dir: server_dir.to_path_buf(),
            jar_file: jar_file.to_string(),
            required_file: Some(server_dir.join(jar_file)),
        }
    }

    /// 任意命令（测试或自定义启动脚本）
    pub fn custom(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        jar_file: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            jar_file: jar_file.into(),
            required_file: None,
        }
    }

    /// 用于日志的命令行
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// 构建子进程命令：三个管道全开，Unix 上放进独立进程组，
    /// 终端的 Ctrl-C 不会直接打到服务器
    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

/// 查找 Java 可执行文件
pub fn resolve_java(config: &ServerConfig, server_dir: &Path) -> PathBuf {
    if let Some(java) = &config.java_path {
        return java.clone();
    }
    let bundled = bundled_java(server_dir);
    if bundled.is_file() {
        return bundled;
    }
    PathBuf::from(JAVA_BIN)
}

/// 服务器目录下捆绑 JRE 的 java 路径
pub fn bundled_java(server_dir: &Path) -> PathBuf {
    server_dir.join(BUNDLED_JAVA_DIR).join("bin").join(JAVA_BIN)
}

/// 在服务器目录中查找 jar（按文件名排序取第一个）
pub fn find_server_jar(server_dir: &Path) -> Option<String> {
    let mut jars: Vec<String> = std::fs::read_dir(server_dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.to_ascii_lowercase().ends_with(".jar"))
        .collect();
    jars.sort();
    jars.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_java_args() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            java_path: Some(PathBuf::from("/opt/jdk/bin/java")),
            xms: "2G".to_string(),
            xmx: "6G".to_string(),
            extra_jvm_args: vec!["-XX:+UseG1GC".to_string()],
            ..Default::default()
        };

        let spec = LaunchSpec::java(&config, dir.path(), "Vanilla-1.21.jar");
        assert_eq!(spec.program, PathBuf::from("/opt/jdk/bin/java"));
        assert_eq!(
            spec.args,
            vec!["-Xms2G", "-Xmx6G", "-XX:+UseG1GC", "-jar", "Vanilla-1.21.jar", "nogui"]
        );
        assert_eq!(spec.working_dir, dir.path());
        assert_eq!(spec.required_file, Some(dir.path().join("Vanilla-1.21.jar")));
    }

    #[test]
    fn test_resolve_java_prefers_bundled() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::default();
        assert_eq!(resolve_java(&config, dir.path()), PathBuf::from(JAVA_BIN));

        let bundled = bundled_java(dir.path());
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, b"").unwrap();
        assert_eq!(resolve_java(&config, dir.path()), bundled);
    }

    #[test]
    fn test_find_server_jar() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_server_jar(dir.path()), None);
        std::fs::write(dir.path().join("eula.txt"), b"eula=true").unwrap();
        std::fs::write(dir.path().join("paper-1.21-10.jar"), b"").unwrap();
        std::fs::write(dir.path().join("Vanilla-1.21.jar"), b"").unwrap();
        assert_eq!(find_server_jar(dir.path()).as_deref(), Some("Vanilla-1.21.jar"));
    }
}
