//! 启动器上下文
//!
//! 持有共享 HTTP 客户端与配置，由调用方创建后显式传给各组件

use crate::config::AppConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// 启动器上下文
#[derive(Debug, Clone)]
pub struct LauncherContext {
    config: Arc<AppConfig>,
    http: Client,
}

impl LauncherContext {
    /// 根据配置构建上下文（包括 HTTP 客户端）
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .user_agent(config.download.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.download.connect_timeout_secs))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// 单次请求超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.download.request_timeout_secs)
    }
}
