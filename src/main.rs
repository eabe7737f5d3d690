use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mc_server_launcher::{
    config::DEFAULT_CONFIG_PATH,
    downloader::{download_event_channel, DownloadEvent, DownloadEventReceiver},
    logging,
    minecraft::{
        eula_accepted, install_server, list_servers, InstallOptions, JreInstaller, ServerKind,
        ServerMetadata,
    },
    process::{
        find_server_jar, server_event_channel, ExitChoice, LaunchSpec, OutputStream,
        ProcessSupervisor, ServerEvent, StopMode, SupervisorState,
    },
    AppConfig, LauncherContext, ProgressReporter, SegmentedDownloader,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Minecraft 服务器启动器
#[derive(Debug, Parser)]
#[command(name = "mc-launcher", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 分段下载任意文件
    Download {
        url: String,
        dest: PathBuf,
        /// 并发分段数（默认取配置）
        #[arg(long)]
        segments: Option<usize>,
    },
    /// 列出服务器版本
    Versions {
        kind: ServerKind,
        /// 包含快照 / 预发布版本
        #[arg(long)]
        snapshots: bool,
    },
    /// 安装服务器及其所需的 JRE（version 可为 latest）
    Install {
        kind: ServerKind,
        version: String,
        /// 目标目录（默认在 servers_dir 下自动命名）
        dir: Option<PathBuf>,
        /// 同意 Minecraft EULA 并写入 eula.txt
        #[arg(long)]
        accept_eula: bool,
        /// 不下载 JRE
        #[arg(long)]
        skip_java: bool,
    },
    /// 列出 servers_dir 下的服务器
    List,
    /// 下载 Adoptium JRE 到服务器目录
    Jre { major: u32, dir: PathBuf },
    /// 启动（或重新连接）服务器并进入控制台
    Run {
        dir: PathBuf,
        /// 服务器 jar 文件名（默认取 config.json 中记录的 jar）
        #[arg(long)]
        jar: Option<String>,
    },
    /// 查看服务器运行状态
    Status { dir: PathBuf },
}

type ConsoleInput = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(&cli.config).await;

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&config.log);

    info!("Minecraft Server Launcher v{} 启动", env!("CARGO_PKG_VERSION"));

    let ctx = LauncherContext::new(config)?;

    match cli.command {
        Command::Download {
            url,
            dest,
            segments,
        } => {
            let segments = segments.unwrap_or(ctx.config().download.segments);
            let size = with_progress(|reporter| async move {
                SegmentedDownloader::from_context(&ctx)
                    .download(&url, &dest, segments, &reporter)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;
            println!("下载完成: {} 字节", size);
        }
        Command::Versions { kind, snapshots } => {
            let source = kind.jar_source(&ctx);
            for version in source.list_versions(snapshots).await? {
                println!(
                    "{:<20} {:<10} {}",
                    version.id,
                    version.kind,
                    version.release_date.unwrap_or_default()
                );
            }
        }
        Command::Install {
            kind,
            version,
            dir,
            accept_eula,
            skip_java,
        } => {
            let options = InstallOptions {
                dir: dir.map(|dir| server_dir(&ctx, dir)),
                accept_eula,
                skip_java,
            };
            let installed = with_progress(|reporter| {
                let ctx = &ctx;
                let options = &options;
                let version = &version;
                async move { install_server(ctx, kind, version, options, &reporter).await }
            })
            .await?;

            println!(
                "已安装 {} {} -> {} ({:?}, {})",
                installed.kind,
                installed.version,
                installed.name,
                installed.dir,
                installed.jar_file
            );
            match (&installed.java, installed.java_major) {
                (Some(java), _) => println!("Java: {:?}", java),
                (None, Some(major)) => println!(
                    "需要 Java {}，可运行 `mc-launcher jre {} {:?}` 安装",
                    major, major, installed.dir
                ),
                (None, None) => {}
            }
            if !installed.eula_accepted {
                println!("尚未同意 EULA，启动前请使用 --accept-eula 或编辑 eula.txt");
            }
        }
        Command::List => {
            let servers = list_servers(&ctx.config().server.servers_dir)?;
            if servers.is_empty() {
                println!("{:?} 下没有服务器", ctx.config().server.servers_dir);
            }
            for server in servers {
                let (kind, version) = match &server.metadata {
                    Some(m) => (m.kind.to_string(), m.version.clone()),
                    None => ("-".to_string(), "-".to_string()),
                };
                let running = match server.running_pid {
                    Some(pid) => format!("运行中 (pid {})", pid),
                    None => "已停止".to_string(),
                };
                println!("{:<28} {:<8} {:<12} {}", server.name, kind, version, running);
            }
        }
        Command::Jre { major, dir } => {
            let dir = server_dir(&ctx, dir);
            let installer = JreInstaller::for_context(&ctx);
            let java = with_progress(|reporter| async move {
                installer.install(major, &dir, &reporter).await
            })
            .await?;
            println!("Java {} 已安装: {:?}", major, java);
        }
        Command::Run { dir, jar } => {
            let dir = server_dir(&ctx, dir);
            run_console(&ctx, &dir, jar).await?;
        }
        Command::Status { dir } => {
            let dir = server_dir(&ctx, dir);
            let supervisor = ProcessSupervisor::open(&dir, &ctx.config().server, None);
            match supervisor.state() {
                SupervisorState::Running { pid, mode } => {
                    println!("运行中: pid={}, 模式={:?}", pid, mode)
                }
                state => println!("{}", state),
            }
            match ServerMetadata::load(&dir) {
                Ok(Some(metadata)) => println!("类型: {} {}", metadata.kind, metadata.version),
                Ok(None) => {}
                Err(e) => warn!("{:#}", e),
            }
            println!("EULA: {}", if eula_accepted(&dir) { "已同意" } else { "未同意" });
            match server_jar(&dir) {
                Some(jar) => println!("服务器 jar: {}", jar),
                None => println!("服务器 jar: 未找到"),
            }
        }
    }

    Ok(())
}

/// 相对路径基于 `servers_dir`
fn server_dir(ctx: &LauncherContext, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        dir
    } else {
        ctx.config().server.servers_dir.join(dir)
    }
}

/// 优先使用 config.json 记录的 jar，缺失时取目录中的第一个 jar
fn server_jar(dir: &Path) -> Option<String> {
    match ServerMetadata::load(dir) {
        Ok(Some(metadata)) if metadata.jar_exists(dir) => return Some(metadata.jar_file),
        Ok(Some(metadata)) => warn!("config.json 记录的 {} 不存在", metadata.jar_file),
        Ok(None) => {}
        Err(e) => warn!("{:#}", e),
    }
    find_server_jar(dir)
}

/// 运行下载类操作，同时在后台打印进度
async fn with_progress<T, F, Fut>(op: F) -> Result<T>
where
    F: FnOnce(ProgressReporter) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let (tx, rx) = download_event_channel();
    let printer = spawn_progress_printer(rx);
    let result = op(ProgressReporter::new(tx)).await;
    // 发送端全部释放后打印任务结束
    if let Err(e) = printer.await {
        warn!("进度打印任务异常退出: {}", e);
    }
    result
}

fn spawn_progress_printer(mut rx: DownloadEventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        while let Some(event) = rx.recv().await {
            match event {
                DownloadEvent::Started {
                    url,
                    total_size,
                    segments,
                    ..
                } => {
                    println!(
                        "开始下载 {} ({} 字节, {} 个分段)",
                        url,
                        total_size.map(|s| s.to_string()).unwrap_or_else(|| "未知".into()),
                        segments
                    );
                }
                DownloadEvent::FallbackSingleStream { reason, .. } => {
                    println!("不支持分段下载，改用单线程: {}", reason);
                }
                DownloadEvent::Progress { progress, .. } => {
                    if last != Some(progress) {
                        last = Some(progress);
                        print!("\r进度: {:>3}%", progress);
                        let _ = std::io::stdout().flush();
                    }
                }
                DownloadEvent::Completed { path, size, .. } => {
                    println!("\n已保存 {} ({} 字节)", path, size);
                }
                DownloadEvent::Failed { error, .. } => {
                    println!("\n下载失败: {}", error);
                }
            }
        }
        if last.is_some() {
            println!();
        }
    })
}

const CONSOLE_HELP: &str = "输入服务器命令直接发送；:start 启动，:stop 停止，:status 查看状态，:quit 退出";

/// 交互式控制台
async fn run_console(ctx: &LauncherContext, dir: &Path, jar: Option<String>) -> Result<()> {
    let config = &ctx.config().server;
    let (tx, mut events) = server_event_channel();
    let supervisor = ProcessSupervisor::open(dir, config, Some(tx));

    if !supervisor.state().is_running() {
        start_server(&supervisor, ctx, dir, jar.as_deref()).await?;
    }
    println!("{}", CONSOLE_HELP);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            Some(event) = events.recv() => {
                print_server_event(&event);
                continue;
            }
            _ = tokio::signal::ctrl_c() => Some(":quit".to_string()),
            line = stdin.next_line() => line.context("读取标准输入失败")?,
        };

        // 标准输入关闭：保留服务器运行并退出
        let Some(line) = line else {
            if let Some(pid) = supervisor.detach() {
                println!("输入已关闭，服务器 (pid {}) 保持运行", pid);
            }
            break;
        };

        match line.trim() {
            "" => {}
            ":start" => {
                if let Err(e) = start_server(&supervisor, ctx, dir, jar.as_deref()).await {
                    println!("启动失败: {:#}", e);
                }
            }
            ":status" => println!("{}", supervisor.state()),
            ":stop" => {
                if supervisor.stop_mode() == Some(StopMode::ForceKill) {
                    println!("⚠️ 当前是重新连接的服务器，无法发送 stop 命令，只能强制终止（未保存的数据会丢失）");
                    if !confirm(&mut stdin).await? {
                        continue;
                    }
                }
                match supervisor.stop().await {
                    Ok(outcome) => println!("服务器已停止: {:?}", outcome),
                    Err(e) => println!("停止失败: {}", e),
                }
            }
            ":quit" => {
                let choice = if supervisor.state().is_running() {
                    ask_exit_choice(&supervisor, &mut stdin).await?
                } else {
                    ExitChoice::StopAndExit
                };
                match supervisor.shutdown_host(choice).await {
                    Ok(true) => break,
                    Ok(false) => println!("已取消"),
                    Err(e) => println!("退出失败: {}", e),
                }
            }
            command => {
                if let Err(e) = supervisor.send_command(command).await {
                    println!("{}", e);
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        print_server_event(&event);
    }
    Ok(())
}

async fn start_server(
    supervisor: &ProcessSupervisor,
    ctx: &LauncherContext,
    dir: &Path,
    jar: Option<&str>,
) -> Result<()> {
    if !eula_accepted(dir) {
        bail!("{:?} 尚未同意 EULA，请编辑 eula.txt 或使用 install --accept-eula", dir);
    }
    let jar = match jar {
        Some(jar) => jar.to_string(),
        None => server_jar(dir).with_context(|| format!("{:?} 中没有服务器 jar", dir))?,
    };
    let spec = LaunchSpec::java(&ctx.config().server, dir, &jar);
    info!("启动命令: {}", spec.command_line());
    supervisor.start(&spec).await?;
    Ok(())
}

async fn ask_exit_choice(
    supervisor: &ProcessSupervisor,
    stdin: &mut ConsoleInput,
) -> Result<ExitChoice> {
    println!("服务器仍在运行：");
    if supervisor.stop_mode() == Some(StopMode::ForceKill) {
        println!("  1) 强制终止服务器并退出（重新连接的进程无法正常停止）");
    } else {
        println!("  1) 停止服务器并退出");
    }
    println!("  2) 保持服务器运行并退出（下次启动时重新连接）");
    println!("  3) 取消");

    loop {
        let Some(line) = stdin.next_line().await.context("读取标准输入失败")? else {
            return Ok(ExitChoice::LeaveRunning);
        };
        match line.trim() {
            "1" => return Ok(ExitChoice::StopAndExit),
            "2" => return Ok(ExitChoice::LeaveRunning),
            "3" | "" => return Ok(ExitChoice::Cancel),
            _ => println!("请输入 1、2 或 3"),
        }
    }
}

async fn confirm(stdin: &mut ConsoleInput) -> Result<bool> {
    print!("确认? [y/N] ");
    let _ = std::io::stdout().flush();
    let line = stdin.next_line().await.context("读取标准输入失败")?;
    Ok(matches!(line.as_deref().map(str::trim), Some("y" | "Y" | "yes")))
}

fn print_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::Output { stream, line } => match stream {
            OutputStream::Stdout => println!("{}", line),
            OutputStream::Stderr => eprintln!("{}", line),
        },
        ServerEvent::StateChanged { state } => println!("[状态] {}", state),
        ServerEvent::Exited {
            pid,
            code,
            requested,
        } => {
            if *requested {
                println!("[退出] pid={} code={:?}", pid, code);
            } else {
                println!("[异常退出] pid={} code={:?}", pid, code);
            }
        }
        ServerEvent::Reattached {
            pid,
            started_at,
            jar_file,
            warning,
        } => {
            println!(
                "[重新连接] pid={} jar={} 启动于 {}",
                pid,
                jar_file,
                started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            );
            println!("⚠️ {}", warning);
        }
        ServerEvent::ForceKillPending { pid, reason, .. } => {
            println!("[强制终止] pid={}: {}", pid, reason)
        }
        ServerEvent::CommandSent { command } => println!("> {}", command),
    }
}
