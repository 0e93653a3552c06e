// 文件托管客户端
//
// 一个实例绑定一份 HostConfig，由一个 worker 独占驱动：
// 构造时按配置完成一次登录，之后的上传/删除/用户信息都复用同一认证状态。
// 跨实例共享的只有线程安全的令牌缓存和带宽计数器（构造时注入，不走全局单例）。
//
// 引擎唯一的自动恢复在这里：token_login 主机的受保护调用遇到 401 时，
// 清缓存 → 重新登录一次 → 重试同一个操作一次；再失败按认证错误上抛。

use crate::auth::{AuthEngine, AuthState, TokenCache};
use crate::common::BandwidthCounter;
use crate::config::{AuthMode, DeleteMethod, HostConfig};
use crate::error::{HostError, Result};
use crate::extract::{
    extract_path, extract_storage_from_html, value_to_bool, value_to_u64, StorageSnapshot,
};
use crate::filehost::types::{CredentialTestReport, DeleteResult, TestUploadReport, UserInfo};
use crate::uploader::{UploadExecutor, UploadHooks, UploadResult};
use reqwest::header::COOKIE;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 删除 / 用户信息等短请求超时
const SHORT_TIMEOUT: Duration = Duration::from_secs(30);

/// 默认 User-Agent
const USER_AGENT: &str = concat!("filehost-uploader/", env!("CARGO_PKG_VERSION"));

/// 客户端构造选项
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// 原始凭证（username:password 或单个 token/API key，按 auth_type 解释）
    pub credentials: Option<String>,
    /// 令牌缓存键；token_login 主机提供后才参与缓存
    pub host_id: Option<String>,
    /// 出口代理 URL
    pub proxy: Option<String>,
}

/// 文件托管客户端
#[derive(Debug)]
pub struct FileHostClient {
    config: Arc<HostConfig>,
    credentials: Option<String>,
    host_id: Option<String>,
    token_cache: Arc<TokenCache>,
    bandwidth: Arc<BandwidthCounter>,
    /// 跟随重定向的客户端
    http: reqwest::Client,
    /// 不跟随重定向的客户端（会话登录 / redirect 响应类型）
    http_direct: reqwest::Client,
    auth: AuthState,
}

impl FileHostClient {
    /// 构造客户端并按配置完成一次登录
    ///
    /// 登录失败直接返回错误；调用方如需重试，重建整个客户端。
    pub async fn connect(
        config: Arc<HostConfig>,
        options: ClientOptions,
        token_cache: Arc<TokenCache>,
        bandwidth: Arc<BandwidthCounter>,
    ) -> Result<Self> {
        let (http, http_direct) = build_http_clients(options.proxy.as_deref())?;

        let engine = AuthEngine::new(&http, &http_direct, &config);
        let auth = engine
            .establish(
                options.credentials.as_deref(),
                options.host_id.as_deref(),
                &token_cache,
            )
            .await?;

        Ok(Self {
            config,
            credentials: options.credentials,
            host_id: options.host_id,
            token_cache,
            bandwidth,
            http,
            http_direct,
            auth,
        })
    }

    /// 主机配置
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// 当前认证状态
    pub fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    /// 登录响应里顺带缓存的存储容量（省一次 /info 调用）
    pub fn cached_storage_from_login(&self) -> Option<&StorageSnapshot> {
        self.auth.storage_from_login.as_ref()
    }

    // =====================================================
    // 上传
    // =====================================================

    /// 上传文件，返回规范化结果
    ///
    /// 进度回调收 (已上传, 总量)；should_stop 返回 true 时中止传输。
    pub async fn upload_file(&mut self, file_path: &Path, hooks: UploadHooks) -> Result<UploadResult> {
        info!("上传 {:?} 到 {} ...", file_path, self.config.name);

        match self.run_upload(file_path, hooks.clone()).await {
            Err(e) if self.should_refresh_token(&e) => {
                warn!("收到 401, 刷新令牌后重试上传...");
                self.refresh_login().await?;
                self.run_upload(file_path, hooks)
                    .await
                    .map_err(second_unauthorized)
            }
            other => other,
        }
    }

    async fn run_upload(&self, file_path: &Path, hooks: UploadHooks) -> Result<UploadResult> {
        let executor = UploadExecutor::new(
            &self.http,
            &self.http_direct,
            &self.config,
            &self.auth,
            Arc::clone(&self.bandwidth),
        );
        executor.upload(file_path, hooks).await
    }

    // =====================================================
    // 辅助操作
    // =====================================================

    /// 删除主机上的文件
    pub async fn delete_file(&self, file_id: &str) -> Result<DeleteResult> {
        let Some(delete_url) = &self.config.delete_url else {
            return Err(HostError::NotSupported(format!(
                "{} 不支持删除文件",
                self.config.name
            )));
        };

        let token = self.auth.auth_token.as_deref().unwrap_or("");
        let url = delete_url
            .replace("{file_id}", file_id)
            .replace("{token}", token);

        debug!("删除文件 {} ({})...", file_id, self.config.name);

        let request = match self.config.delete_method {
            DeleteMethod::Get => self.http.get(&url),
            DeleteMethod::Delete => self.http.delete(&url),
        };
        let response = request.timeout(SHORT_TIMEOUT).send().await?;

        let status = response.status().as_u16();
        if status != 200 && status != 204 {
            return Err(HostError::protocol(
                status,
                format!("删除失败, HTTP {}", status),
            ));
        }

        let raw_response = response.text().await?;
        info!("已删除文件 {} ({})", file_id, self.config.name);

        Ok(DeleteResult {
            file_id: file_id.to_string(),
            raw_response,
        })
    }

    /// 查询用户信息（存储容量、会员状态）
    ///
    /// 与上传一样参与 401 → 刷新令牌 → 重试一次的恢复策略。
    pub async fn get_user_info(&mut self) -> Result<UserInfo> {
        match self.fetch_user_info().await {
            Err(e) if self.should_refresh_token(&e) => {
                warn!("收到 401, 刷新令牌后重试用户信息查询...");
                self.refresh_login().await?;
                self.fetch_user_info().await.map_err(second_unauthorized)
            }
            other => other,
        }
    }

    async fn fetch_user_info(&self) -> Result<UserInfo> {
        let Some(info_url) = &self.config.user_info_url else {
            return Err(HostError::NotSupported(format!(
                "{} 不支持用户信息查询",
                self.config.name
            )));
        };

        // token_login 把令牌替入 URL；会话登录带 Cookie；其余方式没有可查的凭证
        let (url, send_cookies) = match self.config.auth_mode {
            AuthMode::TokenLogin | AuthMode::Bearer | AuthMode::Basic => {
                let token = self.auth.auth_token.as_deref().ok_or_else(|| {
                    HostError::Auth("用户信息查询需要认证令牌".to_string())
                })?;
                (info_url.replace("{token}", token), false)
            }
            AuthMode::Session | AuthMode::ApiKeyOrSession => {
                if self.auth.cookie_jar.is_empty() && self.auth.auth_token.is_none() {
                    return Err(HostError::Auth(
                        "用户信息查询需要会话 Cookie".to_string(),
                    ));
                }
                let token = self.auth.auth_token.as_deref().unwrap_or("");
                (info_url.replace("{token}", token), true)
            }
            AuthMode::None => {
                return Err(HostError::NotSupported(format!(
                    "{} 的认证方式不支持用户信息查询",
                    self.config.name
                )));
            }
        };

        debug!("查询用户信息: {}", self.config.name);

        let mut request = self.http.get(&url).timeout(SHORT_TIMEOUT);
        if send_cookies {
            if let Some(cookies) = self.auth.cookie_header() {
                request = request.header(COOKIE, cookies);
            }
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(HostError::protocol(
                status,
                format!("用户信息获取失败, HTTP {}", status),
            ));
        }

        let body = response.text().await?;

        // storage_regex 配置了就按 HTML 解析，否则按 JSON 路径
        if let Some(regex) = &self.config.storage_regex {
            debug!("按 HTML 解析存储容量 (响应 {} 字节)", body.len());
            let storage = extract_storage_from_html(&body, regex).unwrap_or_default();
            return Ok(UserInfo {
                storage,
                premium: None,
                raw_response: Value::String("HTML response (not logged)".to_string()),
            });
        }

        let data: Value = serde_json::from_str(&body).map_err(|e| {
            HostError::protocol(status, format!("用户信息响应解析失败: {}", e))
        })?;

        let pick = |path: &Option<crate::extract::JsonPath>| {
            path.as_ref()
                .and_then(|p| extract_path(&data, p))
                .and_then(value_to_u64)
        };
        let storage = StorageSnapshot {
            total: pick(&self.config.storage_total_path),
            used: pick(&self.config.storage_used_path),
            left: pick(&self.config.storage_left_path),
        };
        let premium = self
            .config
            .premium_status_path
            .as_ref()
            .and_then(|p| extract_path(&data, p))
            .and_then(value_to_bool);

        info!("用户信息获取成功: {}", self.config.name);

        Ok(UserInfo {
            storage,
            premium,
            raw_response: data,
        })
    }

    // =====================================================
    // 诊断自检（设置界面的"测试"按钮）
    // =====================================================

    /// 校验凭证是否可用，不抛错，返回结构化报告
    pub async fn test_credentials(&mut self) -> CredentialTestReport {
        if !self.config.requires_auth {
            return CredentialTestReport::ok("无需认证");
        }

        let logged_in = match self.config.auth_mode {
            AuthMode::TokenLogin | AuthMode::Bearer | AuthMode::Basic => {
                self.auth.auth_token.is_some()
            }
            AuthMode::Session => !self.auth.cookie_jar.is_empty(),
            AuthMode::ApiKeyOrSession => {
                self.auth.auth_token.is_some() || !self.auth.cookie_jar.is_empty()
            }
            AuthMode::None => true,
        };
        if !logged_in {
            return CredentialTestReport::failed("没有可用的认证状态", "未登录");
        }

        // 有用户信息接口就真查一次，没有只能说令牌存在
        if self.config.user_info_url.is_some() {
            match self.get_user_info().await {
                Ok(user_info) => {
                    let mut report = CredentialTestReport::ok("凭证验证通过");
                    report.user_info = Some(user_info);
                    report
                }
                Err(e) => {
                    CredentialTestReport::failed(format!("凭证校验失败: {}", e), e.to_string())
                }
            }
        } else {
            let mut report = CredentialTestReport::ok("令牌存在 (无法进一步验证)");
            report.warning = Some("主机未提供验证接口".to_string());
            report
        }
    }

    /// 上传一个一次性小压缩包做冒烟测试，可选上传后远端删除
    pub async fn test_upload(&mut self, cleanup: bool) -> TestUploadReport {
        let zip_path = std::env::temp_dir().join("filehost_uploader_test.zip");

        if let Err(e) = create_test_archive(zip_path.clone()).await {
            return TestUploadReport {
                success: false,
                message: format!("创建测试文件失败: {}", e),
                file_id: None,
                url: None,
                error: Some(e.to_string()),
            };
        }
        debug!("已创建测试文件: {:?}", zip_path);

        let result = self.upload_file(&zip_path, UploadHooks::default()).await;
        // 本地测试文件无论成败都清掉
        let _ = tokio::fs::remove_file(&zip_path).await;

        match result {
            Ok(upload) => {
                let file_id = upload.upload_id.clone();
                let cleanup_note = if cleanup && self.config.delete_url.is_some() {
                    match &file_id {
                        Some(id) => match self.delete_file(id).await {
                            Ok(_) => " (测试文件已删除)".to_string(),
                            Err(e) => format!(" (清理失败: {})", e),
                        },
                        None => " (无文件 ID, 未清理)".to_string(),
                    }
                } else {
                    " (测试文件未删除)".to_string()
                };

                TestUploadReport {
                    success: true,
                    message: format!("上传测试成功{}", cleanup_note),
                    file_id,
                    url: Some(upload.url),
                    error: None,
                }
            }
            Err(e) => TestUploadReport {
                success: false,
                message: format!("上传测试失败: {}", e),
                file_id: None,
                url: None,
                error: Some(e.to_string()),
            },
        }
    }

    // =====================================================
    // 过期令牌恢复
    // =====================================================

    /// 是否符合 401 刷新重试的全部条件
    fn should_refresh_token(&self, err: &HostError) -> bool {
        err.is_unauthorized()
            && self.config.auth_mode == AuthMode::TokenLogin
            && self.host_id.is_some()
            && self.credentials.is_some()
    }

    /// 清缓存重新登录，认证状态整体替换
    async fn refresh_login(&mut self) -> Result<()> {
        let host_id = self.host_id.as_deref().ok_or_else(|| {
            HostError::Auth("刷新令牌需要 host_id".to_string())
        })?;
        let credentials = self.credentials.clone().ok_or_else(|| {
            HostError::Auth("刷新令牌需要原始凭证".to_string())
        })?;

        self.token_cache.clear(host_id);

        let engine = AuthEngine::new(&self.http, &self.http_direct, &self.config);
        let state = engine.token_login(&credentials).await?;
        if let Some(token) = &state.auth_token {
            self.token_cache.store(host_id, token, self.config.token_ttl);
        }
        self.auth = state;
        Ok(())
    }
}

/// 第二次仍然 401 时按认证错误上抛
fn second_unauthorized(err: HostError) -> HostError {
    if err.is_unauthorized() {
        HostError::Auth("令牌刷新后主机仍返回 401".to_string())
    } else {
        err
    }
}

/// 构建共用的两个 HTTP 客户端（跟随 / 不跟随重定向）
fn build_http_clients(proxy: Option<&str>) -> Result<(reqwest::Client, reqwest::Client)> {
    let apply_proxy = |builder: reqwest::ClientBuilder| -> Result<reqwest::ClientBuilder> {
        match proxy {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)?;
                Ok(builder.proxy(proxy))
            }
            None => Ok(builder),
        }
    };

    let http = apply_proxy(
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10)),
    )?
    .build()?;

    let http_direct = apply_proxy(
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none()),
    )?
    .build()?;

    Ok((http, http_direct))
}

/// 生成试传用的小 ZIP（仅存储不压缩）
async fn create_test_archive(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::create(&path)?;
        let mut archive = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        archive
            .start_file("test.txt", options)
            .map_err(zip_to_io)?;
        archive.write_all(b"filehost uploader test file - safe to delete")?;
        archive.finish().map_err(zip_to_io)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

fn zip_to_io(e: zip::result::ZipError) -> HostError {
    HostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
