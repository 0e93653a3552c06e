// 文件托管客户端模块
//
// client 是对外门面：构造时登录，之后上传/删除/用户信息共用认证状态。

pub mod client;
pub mod types;

pub use client::{ClientOptions, FileHostClient};
pub use types::{CredentialTestReport, DeleteResult, TestUploadReport, UserInfo};
