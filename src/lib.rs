// 通用文件托管上传引擎
// 每个主机的协议用一份声明式 JSON 文档描述，由同一套引擎解释执行

// 认证模块（登录引擎 / 令牌缓存 / 验证码还原）
pub mod auth;

// 配置管理模块（主机协议文档 / 配置仓库 / 应用配置）
pub mod config;

// 错误类型
pub mod error;

// 通用响应提取（JSON 路径 / 正则 / 链接模板）
pub mod extract;

// 客户端门面（上传 / 删除 / 用户信息 / 诊断自检）
pub mod filehost;

// 日志系统
pub mod logging;

// 上传引擎（标准与多步上传状态机）
pub mod uploader;

// 公共模块（带宽计数器）
pub mod common;

// 测试用 HTTP 桩服务器
#[cfg(test)]
pub(crate) mod testserver;

// 导出常用类型
pub use auth::{AuthEngine, AuthState, TokenCache};
pub use common::BandwidthCounter;
pub use config::{
    AppConfig, AuthMode, HostConfig, HostConfigStore, UploadMode, UploadTrigger,
};
pub use error::{HostError, Result};
pub use extract::StorageSnapshot;
pub use filehost::{
    ClientOptions, CredentialTestReport, FileHostClient, TestUploadReport, UserInfo,
};
pub use uploader::{UploadHooks, UploadResult};
