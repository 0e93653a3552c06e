//! 日志系统配置
//!
//! 控制台输出 + 可选的按天滚动文件持久化，启动时清理过期日志

use crate::config::LogConfig;
use chrono::Local;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件前缀（按天滚动时 appender 自动追加 .YYYY-MM-DD）
const LOG_FILE_PREFIX: &str = "filehost-uploader.log";

/// 时间戳格式
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 日志系统守卫
/// 必须保持存活，否则文件写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// # Arguments
/// * `config` - 日志配置
///
/// # Returns
/// * `LogGuard` - 日志守卫，需要保持存活直到程序结束
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!("创建日志目录失败: {:?}, 错误: {}, 回退到仅控制台输出", config.log_dir, e);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    }

    cleanup_old_logs(&config.log_dir, config.retention_days);

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
        config.log_dir, config.retention_days, config.level
    );

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理过期日志文件（文件名格式: filehost-uploader.log.YYYY-MM-DD）
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return;
        }
    };

    let mut deleted_count = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        let Some(date_str) = extract_date_from_filename(filename) else {
            continue;
        };
        let Ok(file_date) = chrono::NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") else {
            continue;
        };

        if today.signed_duration_since(file_date) > retention {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e);
            } else {
                deleted_count += 1;
            }
        }
    }

    if deleted_count > 0 {
        info!("已清理 {} 个过期日志文件", deleted_count);
    }
}

/// 从文件名提取日期部分
///
/// filehost-uploader.log.YYYY-MM-DD -> YYYY-MM-DD
fn extract_date_from_filename(filename: &str) -> Option<String> {
    let suffix = filename.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    if suffix.len() == 10 {
        Some(suffix.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extract_date_from_filename() {
        assert_eq!(
            extract_date_from_filename("filehost-uploader.log.2026-08-07"),
            Some("2026-08-07".to_string())
        );
        assert_eq!(extract_date_from_filename("filehost-uploader.log"), None);
        assert_eq!(extract_date_from_filename("other.log.2026-08-07"), None);
    }

    #[test]
    fn test_cleanup_removes_only_dated_stale_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let stale = dir.path().join("filehost-uploader.log.2000-01-01");
        let fresh = dir
            .path()
            .join(format!("filehost-uploader.log.{}", Local::now().date_naive()));
        let unrelated = dir.path().join("notes.txt");
        fs::write(&stale, "old").unwrap();
        fs::write(&fresh, "new").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        cleanup_old_logs(dir.path(), 7);

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        cleanup_old_logs(&PathBuf::from("/nonexistent/logs"), 7);
    }

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.level, "info");
    }
}
