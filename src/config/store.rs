// 主机配置仓库
//
// 从内置目录和用户目录加载 *.json 主机文档，
// 文件名（去扩展名）即 host_id，用户目录同名覆盖内置。
// 单个文件坏了只记日志跳过，不影响其余主机。

use crate::config::host::HostConfig;
use crate::error::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 上传触发时机（外层队列按事件挑选主机）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTrigger {
    Added,
    Started,
    Completed,
}

/// 主机配置仓库
///
/// 在组合根构造一次，句柄传给需要的引擎（不做全局单例）
#[derive(Debug, Default)]
pub struct HostConfigStore {
    hosts: BTreeMap<String, Arc<HostConfig>>,
}

impl HostConfigStore {
    /// 从内置目录和用户目录加载全部主机配置
    pub async fn load(builtin_dir: &Path, user_dir: &Path) -> Result<Self> {
        let mut store = Self::default();
        // 先内置后用户，同名 host_id 以用户目录为准
        store.load_dir(builtin_dir, "built-in").await;
        store.load_dir(user_dir, "custom").await;
        info!("主机配置加载完成: {} 个主机", store.hosts.len());
        Ok(store)
    }

    async fn load_dir(&mut self, dir: &Path, source: &str) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("读取主机配置目录失败: {:?}, 错误: {}", dir, e);
                return;
            }
        };

        let mut files: Vec<PathBuf> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        // 目录遍历顺序不稳定，排序保证加载日志可复现
        files.sort();

        for path in files {
            let Some(host_id) = path.file_stem().and_then(|s| s.to_str()).map(String::from)
            else {
                continue;
            };

            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("读取主机配置失败: {:?}, 错误: {}", path, e);
                    continue;
                }
            };

            match HostConfig::from_json_str(&text) {
                Ok(config) => {
                    info!("已加载 {} 主机: {} ({})", source, config.name, host_id);
                    self.hosts.insert(host_id, Arc::new(config));
                }
                Err(e) => {
                    warn!("主机配置非法, 已跳过: {:?}, 错误: {}", path, e);
                }
            }
        }
    }

    /// 手工注入一个主机配置（测试和嵌入场景用）
    pub fn insert(&mut self, host_id: impl Into<String>, config: HostConfig) {
        self.hosts.insert(host_id.into(), Arc::new(config));
    }

    /// 按 host_id 取配置
    pub fn get(&self, host_id: &str) -> Option<Arc<HostConfig>> {
        self.hosts.get(host_id).cloned()
    }

    /// 全部已启用主机
    pub fn enabled_hosts(&self) -> BTreeMap<String, Arc<HostConfig>> {
        self.hosts
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect()
    }

    /// 按触发时机筛选已启用主机
    pub fn hosts_by_trigger(&self, trigger: UploadTrigger) -> BTreeMap<String, Arc<HostConfig>> {
        self.hosts
            .iter()
            .filter(|(_, c)| {
                c.enabled
                    && match trigger {
                        UploadTrigger::Added => c.triggers.on_added,
                        UploadTrigger::Started => c.triggers.on_started,
                        UploadTrigger::Completed => c.triggers.on_completed,
                    }
            })
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect()
    }

    /// 全部 host_id
    pub fn host_ids(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// 主机数量
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
