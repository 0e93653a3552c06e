// 文件托管客户端的结果类型

use crate::extract::StorageSnapshot;
use serde_json::Value;

/// 用户信息（存储容量 + 会员状态）
#[derive(Debug, Clone)]
pub struct UserInfo {
    /// 存储容量快照（字节）
    pub storage: StorageSnapshot,
    /// 是否为付费会员（主机未暴露则为 None）
    pub premium: Option<bool>,
    /// 原始响应（HTML 响应只保留占位说明，不回存整页）
    pub raw_response: Value,
}

/// 删除操作结果
#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub file_id: String,
    pub raw_response: String,
}

/// 凭证自检报告（诊断界面用，不抛错）
#[derive(Debug, Clone)]
pub struct CredentialTestReport {
    pub success: bool,
    pub message: String,
    pub user_info: Option<UserInfo>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl CredentialTestReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            user_info: None,
            warning: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user_info: None,
            warning: None,
            error: Some(error.into()),
        }
    }
}

/// 试传报告（诊断界面用，不抛错）
#[derive(Debug, Clone)]
pub struct TestUploadReport {
    pub success: bool,
    pub message: String,
    pub file_id: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
}
