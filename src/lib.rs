// Minecraft Server Launcher Library
// Minecraft 服务器启动器核心库

// 配置管理模块
pub mod config;

// 共享上下文（HTTP 客户端 + 配置）
pub mod context;

// 日志系统
pub mod logging;

// 下载引擎模块（分段 / 单线程）
pub mod downloader;

// 服务器进程托管模块
pub mod process;

// 服务器类型、版本解析、JRE 与安装
pub mod minecraft;

// 导出常用类型
pub use config::AppConfig;
pub use context::LauncherContext;
pub use downloader::{
    DownloadError, DownloadEvent, DownloadTask, ProgressReporter, SegmentedDownloader,
    SingleStreamDownloader,
};
pub use process::{
    ExitChoice, LaunchSpec, ProcessError, ProcessSupervisor, ServerEvent, StopOutcome,
    SupervisorState,
};

// 导出服务器安装相关类型
pub use minecraft::{
    install_server, InstallOptions, InstalledServer, JarSource, JreInstaller, ServerKind,
    ServerMetadata,
};
