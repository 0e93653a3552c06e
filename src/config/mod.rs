// 配置管理模块

pub mod host;
pub mod store;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

pub use host::{
    AuthMode, CaptchaTransform, DeleteMethod, HostConfig, HttpMethod, MultiStepUpload,
    RawHostConfig, ResponseType, RetrySettings, TriggerSettings, UploadMode,
};
pub use store::{HostConfigStore, UploadTrigger};

/// 应用配置（config.toml）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 主机配置目录
    #[serde(default)]
    pub hosts: HostsConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 主机配置目录设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    /// 内置主机配置目录（随程序分发）
    #[serde(default = "default_builtin_dir")]
    pub builtin_dir: PathBuf,
    /// 用户自定义主机配置目录（同名覆盖内置）
    #[serde(default = "default_user_dir")]
    pub user_dir: PathBuf,
    /// 可选的出口代理（http/https/socks5 URL）
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            builtin_dir: default_builtin_dir(),
            user_dir: default_user_dir(),
            proxy: None,
        }
    }
}

fn default_builtin_dir() -> PathBuf {
    PathBuf::from("assets/hosts")
}

fn default_user_dir() -> PathBuf {
    PathBuf::from("hosts")
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// 从 TOML 文件加载，文件不存在时使用默认配置
    pub async fn load(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.hosts.builtin_dir, PathBuf::from("assets/hosts"));
        assert_eq!(config.hosts.user_dir, PathBuf::from("hosts"));
        assert!(config.hosts.proxy.is_none());
        assert!(config.log.enabled);
        assert_eq!(config.log.retention_days, 7);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [hosts]
            user_dir = "/data/hosts"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.hosts.user_dir, PathBuf::from("/data/hosts"));
        assert_eq!(config.hosts.builtin_dir, PathBuf::from("assets/hosts"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.retention_days, 7);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let config = AppConfig::load(&PathBuf::from("/nonexistent/config.toml"))
            .await
            .unwrap();
        assert_eq!(config.log.level, "info");
    }
}
