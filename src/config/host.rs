// 主机协议配置
//
// 每个文件托管主机用一份 JSON 文档描述自己的登录/上传/解析协议，
// 引擎只按这些字段行事。核心约定：配置自说明，
// 引擎的任何分支都不允许依赖主机名，否则解释器就不通用了。
//
// 文档先反序列化成宽松的 RawHostConfig（全部可选 + 默认值），
// 再经过一次显式校验变成强类型的 HostConfig；
// 字段缺失、正则非法这类问题都在加载时暴露，而不是等到上传一半才炸。

use crate::error::{HostError, Result};
use crate::extract::{JsonPath, PathStep};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

// =====================================================
// 原始文档模型（与 JSON 文档逐节对应）
// =====================================================

/// 主机配置文档的原始形态
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHostConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub auth_type: Option<String>,

    #[serde(default)]
    pub upload: RawUploadSection,
    #[serde(default)]
    pub response: RawResponseSection,
    #[serde(default)]
    pub auth: RawAuthSection,
    #[serde(default)]
    pub multistep: RawMultistepSection,
    #[serde(default)]
    pub delete: RawDeleteSection,
    #[serde(default)]
    pub user_info: RawUserInfoSection,
    #[serde(default)]
    pub limits: RawLimitsSection,
    #[serde(default)]
    pub triggers: RawTriggersSection,
    #[serde(default)]
    pub retry: RawRetrySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUploadSection {
    #[serde(default)]
    pub get_server: Option<String>,
    #[serde(default)]
    pub server_response_path: Option<JsonPath>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_file_field")]
    pub file_field: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

impl Default for RawUploadSection {
    fn default() -> Self {
        Self {
            get_server: None,
            server_response_path: None,
            endpoint: String::new(),
            method: default_method(),
            file_field: default_file_field(),
            extra_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResponseSection {
    #[serde(rename = "type", default = "default_response_type")]
    pub response_type: String,
    #[serde(default)]
    pub link_path: Option<JsonPath>,
    #[serde(default)]
    pub link_prefix: String,
    #[serde(default)]
    pub link_suffix: String,
    #[serde(default)]
    pub link_regex: Option<String>,
}

impl Default for RawResponseSection {
    fn default() -> Self {
        Self {
            response_type: default_response_type(),
            link_path: None,
            link_prefix: String::new(),
            link_suffix: String::new(),
            link_regex: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthSection {
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub login_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub session_id_regex: Option<String>,
    #[serde(default)]
    pub upload_page_url: Option<String>,
    #[serde(default)]
    pub session_cookie_name: Option<String>,
    #[serde(default)]
    pub captcha_regex: Option<String>,
    #[serde(default = "default_captcha_field")]
    pub captcha_field: String,
    #[serde(default)]
    pub captcha_transform: Option<String>,
    #[serde(default)]
    pub token_path: Option<JsonPath>,
    #[serde(default)]
    pub token_ttl: Option<u64>,
}

impl Default for RawAuthSection {
    fn default() -> Self {
        Self {
            login_url: None,
            login_fields: BTreeMap::new(),
            session_id_regex: None,
            upload_page_url: None,
            session_cookie_name: None,
            captcha_regex: None,
            captcha_field: default_captcha_field(),
            captcha_transform: None,
            token_path: None,
            token_ttl: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMultistepSection {
    #[serde(default)]
    pub init_url: Option<String>,
    #[serde(default)]
    pub upload_url_path: Option<JsonPath>,
    #[serde(default)]
    pub upload_id_path: Option<JsonPath>,
    #[serde(default)]
    pub poll_url: Option<String>,
    #[serde(default = "default_poll_delay")]
    pub poll_delay: f64,
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,
    #[serde(default)]
    pub require_hash: bool,
    #[serde(default)]
    pub state_path: Option<JsonPath>,
    #[serde(default)]
    pub dedup_link_path: Option<JsonPath>,
    #[serde(default)]
    pub poll_link_paths: Option<Vec<JsonPath>>,
}

impl Default for RawMultistepSection {
    fn default() -> Self {
        Self {
            init_url: None,
            upload_url_path: None,
            upload_id_path: None,
            poll_url: None,
            poll_delay: default_poll_delay(),
            poll_retries: default_poll_retries(),
            require_hash: false,
            state_path: None,
            dedup_link_path: None,
            poll_link_paths: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDeleteSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_delete_method")]
    pub method: String,
}

impl Default for RawDeleteSection {
    fn default() -> Self {
        Self {
            url: None,
            method: default_delete_method(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserInfoSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub storage_total_path: Option<JsonPath>,
    #[serde(default)]
    pub storage_used_path: Option<JsonPath>,
    #[serde(default)]
    pub storage_left_path: Option<JsonPath>,
    #[serde(default)]
    pub storage_regex: Option<String>,
    #[serde(default)]
    pub premium_status_path: Option<JsonPath>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLimitsSection {
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for RawLimitsSection {
    fn default() -> Self {
        Self {
            max_file_size_mb: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawTriggersSection {
    #[serde(default)]
    pub on_added: bool,
    #[serde(default)]
    pub on_started: bool,
    #[serde(default)]
    pub on_completed: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawRetrySection {
    #[serde(default = "default_auto_retry")]
    pub auto_retry: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RawRetrySection {
    fn default() -> Self {
        Self {
            auto_retry: default_auto_retry(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_file_field() -> String {
    "file".to_string()
}

fn default_response_type() -> String {
    "json".to_string()
}

fn default_captcha_field() -> String {
    "code".to_string()
}

fn default_poll_delay() -> f64 {
    1.0
}

fn default_poll_retries() -> u32 {
    10
}

fn default_delete_method() -> String {
    "GET".to_string()
}

fn default_max_connections() -> u32 {
    2
}

fn default_auto_retry() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

// =====================================================
// 校验后的强类型配置
// =====================================================

/// 认证方式（从 requires_auth + auth_type 一次性推导）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// 无需认证
    None,
    /// Authorization: Bearer <token>
    Bearer,
    /// Authorization: Basic base64(":" + token)
    Basic,
    /// 先登录换取令牌，参与全局令牌缓存
    TokenLogin,
    /// 会话登录（Cookie + CSRF 隐藏域 + 可选验证码）
    Session,
    /// 凭证带冒号走会话登录，否则当作 API key（Bearer）
    ApiKeyOrSession,
}

/// 上传协议形态（init_url 是否配置决定）
#[derive(Debug, Clone)]
pub enum UploadMode {
    /// 单请求上传
    Standard,
    /// init → transfer → poll 异步处理协议
    MultiStep(MultiStepUpload),
}

/// 多步上传协议参数
#[derive(Debug, Clone)]
pub struct MultiStepUpload {
    pub init_url: String,
    pub upload_url_path: JsonPath,
    pub upload_id_path: JsonPath,
    pub poll_url: Option<String>,
    pub poll_delay: f64,
    pub poll_retries: u32,
    pub require_hash: bool,
    /// 响应中上传状态字段的位置（状态 2 = 处理完成/文件已存在）
    pub state_path: JsonPath,
    /// 去重命中时已有文件 URL 的位置
    pub dedup_link_path: JsonPath,
    /// 轮询完成后最终 URL 的候选位置，按顺序尝试
    /// （各主机暴露的位置不一致，新主机的差异靠加一条配置解决）
    pub poll_link_paths: Vec<JsonPath>,
}

/// HTTP 上传方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
}

/// 删除接口方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMethod {
    Get,
    Delete,
}

/// 响应解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Json,
    Text,
    Redirect,
}

/// 验证码数字重排规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptchaTransform {
    /// 原样提交
    #[default]
    Identity,
    /// 第 3 位移到最前："1489" -> "8149"
    Move3rdToFront,
    /// 整体反转
    Reverse,
}

/// 触发时机（数据透传给外层队列，引擎自身不消费）
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerSettings {
    pub on_added: bool,
    pub on_started: bool,
    pub on_completed: bool,
}

/// 外层队列的重试参数（数据透传，引擎内部不做多次重试）
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub auto_retry: bool,
    pub max_retries: u32,
}

/// 校验后的主机配置（运行期不可变）
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub name: String,
    pub enabled: bool,
    pub icon: Option<String>,

    // 认证
    pub requires_auth: bool,
    pub auth_mode: AuthMode,
    pub login_url: Option<String>,
    pub login_fields: BTreeMap<String, String>,
    pub token_path: Option<JsonPath>,
    pub token_ttl: Option<u64>,
    pub session_id_regex: Option<Regex>,
    pub upload_page_url: Option<String>,
    pub session_cookie_name: Option<String>,
    pub captcha_regex: Option<Regex>,
    pub captcha_field: String,
    pub captcha_transform: CaptchaTransform,

    // 上传
    pub get_server: Option<String>,
    pub server_response_path: Option<JsonPath>,
    pub upload_endpoint: String,
    pub method: HttpMethod,
    pub file_field: String,
    pub extra_fields: BTreeMap<String, String>,
    pub upload_mode: UploadMode,

    // 响应解析
    pub response_type: ResponseType,
    pub link_path: Option<JsonPath>,
    pub link_prefix: String,
    pub link_suffix: String,
    pub link_regex: Option<Regex>,

    // 删除 / 用户信息
    pub delete_url: Option<String>,
    pub delete_method: DeleteMethod,
    pub user_info_url: Option<String>,
    pub storage_total_path: Option<JsonPath>,
    pub storage_used_path: Option<JsonPath>,
    pub storage_left_path: Option<JsonPath>,
    pub storage_regex: Option<Regex>,
    pub premium_status_path: Option<JsonPath>,

    // 限制 / 触发 / 重试（透传数据）
    pub max_file_size_mb: Option<u64>,
    pub max_connections: u32,
    pub triggers: TriggerSettings,
    pub retry: RetrySettings,
}

fn default_state_path() -> JsonPath {
    crate::extract::key_path(&["response", "upload", "state"])
}

fn default_dedup_link_path() -> JsonPath {
    crate::extract::key_path(&["response", "upload", "file", "url"])
}

fn default_poll_link_paths() -> Vec<JsonPath> {
    vec![
        crate::extract::key_path(&["response", "file", "url"]),
        crate::extract::key_path(&["response", "upload", "file_url"]),
    ]
}

fn compile_regex(host: &str, field: &str, pattern: &Option<String>) -> Result<Option<Regex>> {
    match pattern {
        Some(p) => Regex::new(p).map(Some).map_err(|e| {
            HostError::Config(format!("主机 {} 的 {} 正则非法: {}", host, field, e))
        }),
        None => Ok(None),
    }
}

/// 验证码/存储容量的正则要跨行匹配整块 HTML，按 . 匹配换行编译
fn compile_regex_dotall(host: &str, field: &str, pattern: &Option<String>) -> Result<Option<Regex>> {
    match pattern {
        Some(p) => regex::RegexBuilder::new(p)
            .dot_matches_new_line(true)
            .build()
            .map(Some)
            .map_err(|e| {
                HostError::Config(format!("主机 {} 的 {} 正则非法: {}", host, field, e))
            }),
        None => Ok(None),
    }
}

impl HostConfig {
    /// 从原始文档校验并构造
    pub fn from_raw(raw: RawHostConfig) -> Result<Self> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(HostError::Config("主机配置缺少 name".to_string()));
        }

        let auth_mode = match (raw.requires_auth, raw.auth_type.as_deref()) {
            (false, _) | (true, Some("none")) => AuthMode::None,
            (true, Some("bearer")) => AuthMode::Bearer,
            (true, Some("basic")) => AuthMode::Basic,
            (true, Some("token_login")) => AuthMode::TokenLogin,
            (true, Some("session")) => AuthMode::Session,
            (true, Some("api_key_or_session")) => AuthMode::ApiKeyOrSession,
            (true, Some(other)) => {
                return Err(HostError::Config(format!(
                    "主机 {} 的 auth_type 未知: {}",
                    name, other
                )))
            }
            (true, None) => {
                return Err(HostError::Config(format!(
                    "主机 {} 标记 requires_auth 但未指定 auth_type",
                    name
                )))
            }
        };

        // 认证方式对字段的硬性要求：加载时就挡掉，不等上传途中
        match auth_mode {
            AuthMode::TokenLogin => {
                if raw.auth.login_url.is_none() {
                    return Err(HostError::Config(format!(
                        "主机 {} 使用 token_login 但缺少 auth.login_url",
                        name
                    )));
                }
                if raw.auth.token_path.is_none() {
                    return Err(HostError::Config(format!(
                        "主机 {} 使用 token_login 但缺少 auth.token_path",
                        name
                    )));
                }
            }
            AuthMode::Session | AuthMode::ApiKeyOrSession => {
                if raw.auth.login_url.is_none() {
                    return Err(HostError::Config(format!(
                        "主机 {} 使用会话登录但缺少 auth.login_url",
                        name
                    )));
                }
            }
            _ => {}
        }

        let method = match raw.upload.method.to_ascii_uppercase().as_str() {
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            other => {
                return Err(HostError::Config(format!(
                    "主机 {} 的上传方法未知: {}",
                    name, other
                )))
            }
        };

        let delete_method = match raw.delete.method.to_ascii_uppercase().as_str() {
            "GET" => DeleteMethod::Get,
            "DELETE" => DeleteMethod::Delete,
            other => {
                return Err(HostError::Config(format!(
                    "主机 {} 的删除方法未知: {}",
                    name, other
                )))
            }
        };

        let response_type = match raw.response.response_type.as_str() {
            "json" => ResponseType::Json,
            "text" => ResponseType::Text,
            "redirect" => ResponseType::Redirect,
            other => {
                return Err(HostError::Config(format!(
                    "主机 {} 的响应类型未知: {}",
                    name, other
                )))
            }
        };

        let captcha_transform = match raw.auth.captcha_transform.as_deref() {
            None | Some("") => CaptchaTransform::Identity,
            Some("move_3rd_to_front") => CaptchaTransform::Move3rdToFront,
            Some("reverse") => CaptchaTransform::Reverse,
            Some(other) => {
                return Err(HostError::Config(format!(
                    "主机 {} 的 captcha_transform 未知: {}",
                    name, other
                )))
            }
        };

        // 动态服务器解析必须知道去哪取服务器地址（不做按主机名的特判兜底）
        if raw.upload.get_server.is_some() && raw.upload.server_response_path.is_none() {
            return Err(HostError::Config(format!(
                "主机 {} 配置了 get_server 但缺少 server_response_path",
                name
            )));
        }

        let upload_mode = match raw.multistep.init_url.clone() {
            Some(init_url) => {
                if !raw.multistep.poll_delay.is_finite() || raw.multistep.poll_delay < 0.0 {
                    return Err(HostError::Config(format!(
                        "主机 {} 的 poll_delay 非法: {}",
                        name, raw.multistep.poll_delay
                    )));
                }
                let upload_url_path = raw.multistep.upload_url_path.clone().ok_or_else(|| {
                    HostError::Config(format!(
                        "主机 {} 使用多步上传但缺少 multistep.upload_url_path",
                        name
                    ))
                })?;
                let upload_id_path = raw.multistep.upload_id_path.clone().ok_or_else(|| {
                    HostError::Config(format!(
                        "主机 {} 使用多步上传但缺少 multistep.upload_id_path",
                        name
                    ))
                })?;
                UploadMode::MultiStep(MultiStepUpload {
                    init_url,
                    upload_url_path,
                    upload_id_path,
                    poll_url: raw.multistep.poll_url.clone(),
                    poll_delay: raw.multistep.poll_delay,
                    poll_retries: raw.multistep.poll_retries,
                    require_hash: raw.multistep.require_hash,
                    state_path: raw
                        .multistep
                        .state_path
                        .clone()
                        .unwrap_or_else(default_state_path),
                    dedup_link_path: raw
                        .multistep
                        .dedup_link_path
                        .clone()
                        .unwrap_or_else(default_dedup_link_path),
                    poll_link_paths: raw
                        .multistep
                        .poll_link_paths
                        .clone()
                        .unwrap_or_else(default_poll_link_paths),
                })
            }
            None => {
                if raw.upload.endpoint.trim().is_empty() {
                    return Err(HostError::Config(format!(
                        "主机 {} 缺少 upload.endpoint",
                        name
                    )));
                }
                UploadMode::Standard
            }
        };

        let session_id_regex = compile_regex(&name, "session_id_regex", &raw.auth.session_id_regex)?;
        let captcha_regex = compile_regex_dotall(&name, "captcha_regex", &raw.auth.captcha_regex)?;
        let link_regex = compile_regex(&name, "link_regex", &raw.response.link_regex)?;
        let storage_regex =
            compile_regex_dotall(&name, "storage_regex", &raw.user_info.storage_regex)?;

        Ok(Self {
            name,
            enabled: raw.enabled,
            icon: raw.icon,
            requires_auth: raw.requires_auth,
            auth_mode,
            login_url: raw.auth.login_url,
            login_fields: raw.auth.login_fields,
            token_path: raw.auth.token_path,
            token_ttl: raw.auth.token_ttl,
            session_id_regex,
            upload_page_url: raw.auth.upload_page_url,
            session_cookie_name: raw.auth.session_cookie_name,
            captcha_regex,
            captcha_field: raw.auth.captcha_field,
            captcha_transform,
            get_server: raw.upload.get_server,
            server_response_path: raw.upload.server_response_path,
            upload_endpoint: raw.upload.endpoint,
            method,
            file_field: raw.upload.file_field,
            extra_fields: raw.upload.extra_fields,
            upload_mode,
            response_type,
            link_path: raw.response.link_path,
            link_prefix: raw.response.link_prefix,
            link_suffix: raw.response.link_suffix,
            link_regex,
            delete_url: raw.delete.url,
            delete_method,
            user_info_url: raw.user_info.url,
            storage_total_path: raw.user_info.storage_total_path,
            storage_used_path: raw.user_info.storage_used_path,
            storage_left_path: raw.user_info.storage_left_path,
            storage_regex,
            premium_status_path: raw.user_info.premium_status_path,
            max_file_size_mb: raw.limits.max_file_size_mb,
            max_connections: raw.limits.max_connections,
            triggers: TriggerSettings {
                on_added: raw.triggers.on_added,
                on_started: raw.triggers.on_started,
                on_completed: raw.triggers.on_completed,
            },
            retry: RetrySettings {
                auto_retry: raw.retry.auto_retry,
                max_retries: raw.retry.max_retries,
            },
        })
    }

    /// 从 JSON 字符串加载并校验
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawHostConfig = serde_json::from_str(text)
            .map_err(|e| HostError::Config(format!("主机配置 JSON 解析失败: {}", e)))?;
        Self::from_raw(raw)
    }

    /// 是否为多步上传协议
    pub fn is_multistep(&self) -> bool {
        matches!(self.upload_mode, UploadMode::MultiStep(_))
    }
}
