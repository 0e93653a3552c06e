// 错误类型定义
//
// 整个引擎只做一种自动恢复：token_login 主机遇到 401 时刷新令牌并重试一次。
// 其余错误一律携带尽可能详细的信息向调用方传播，由外层队列决定是否整体重试。

use thiserror::Error;

/// 文件托管引擎统一错误类型
#[derive(Debug, Error)]
pub enum HostError {
    /// 配置缺失或非法（加载/校验阶段尽早抛出，不等到上传途中）
    #[error("配置错误: {0}")]
    Config(String),

    /// 登录被拒绝、凭证格式错误、缺少会话 Cookie 等认证失败
    #[error("认证失败: {0}")]
    Auth(String),

    /// 网络层失败（超时、连接重置等）
    #[error("网络错误: {0}")]
    Transfer(#[from] reqwest::Error),

    /// HTTP 层成功或失败，但主机 API 报告了错误状态
    ///
    /// `status` 保留 HTTP 状态码，401 刷新逻辑依赖它做判断
    #[error("协议错误 (HTTP {status:?}): {message}")]
    Protocol {
        status: Option<u16>,
        message: String,
    },

    /// 轮询次数耗尽，附带最后一次响应体便于诊断
    #[error("上传处理超时 (upload_id: {upload_id}), 最后响应: {last_response}")]
    PollTimeout {
        upload_id: String,
        last_response: String,
    },

    /// 主机配置未提供该操作（如删除、用户信息）
    #[error("不支持的操作: {0}")]
    NotSupported(String),

    /// 调用方通过 should_stop 谓词主动中止传输
    #[error("上传已取消")]
    Cancelled,

    /// 本地文件读写失败
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// 构造协议错误的便捷方法
    pub fn protocol(status: impl Into<Option<u16>>, message: impl Into<String>) -> Self {
        HostError::Protocol {
            status: status.into(),
            message: message.into(),
        }
    }

    /// 是否为 HTTP 401（令牌失效的判定依据）
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            HostError::Protocol {
                status: Some(401),
                ..
            }
        )
    }
}

/// 引擎统一 Result 别名
pub type Result<T> = std::result::Result<T, HostError>;
