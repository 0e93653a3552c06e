// 上传执行器
//
// 两条路径，完全由配置字段选择，不看主机名：
// - 标准上传：单个 PUT/POST 请求，可选动态服务器解析和会话 sess_id
// - 多步上传：init → transfer → poll，init 阶段可能命中服务端去重
//
// 执行器本身无状态，持有配置和认证状态的引用，
// 每次 upload 调用独立记进度账；401 刷新重试由外层客户端负责。

use crate::auth::AuthState;
use crate::common::BandwidthCounter;
use crate::config::{HostConfig, HttpMethod, MultiStepUpload, ResponseType, UploadMode};
use crate::error::{HostError, Result};
use crate::extract::{
    embedded_error_message, embedded_status, extract_path, key_path, link_from_text,
    unwrap_top_level_array, value_to_string,
};
use crate::uploader::hash;
use crate::uploader::progress::{progress_stream, TransferObserver, UploadHooks};
use reqwest::header::{AUTHORIZATION, COOKIE, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 文件传输请求超时
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
/// init / poll / 页面抓取等短请求超时
const SHORT_TIMEOUT: Duration = Duration::from_secs(30);
/// 动态服务器解析超时
const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// 规范化的上传结果
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// 文件的下载/展示链接（主机未返回时为空）
    pub url: String,
    /// 主机分配的上传/文件 ID
    pub upload_id: Option<String>,
    /// 是否命中服务端去重（未发生实际传输）
    pub deduplicated: bool,
    /// 原始响应（JSON 响应为解析后的值，文本响应为字符串）
    pub raw_response: Value,
}

impl UploadResult {
    /// 删除等后续操作用的文件 ID（与 upload_id 同值）
    pub fn file_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }
}

/// 上传执行器（借用单个客户端实例的配置与认证状态）
pub struct UploadExecutor<'a> {
    /// 跟随重定向的客户端
    http: &'a reqwest::Client,
    /// 不跟随重定向的客户端（redirect 响应类型要亲手读 Location）
    http_direct: &'a reqwest::Client,
    config: &'a HostConfig,
    auth: &'a AuthState,
    bandwidth: Arc<BandwidthCounter>,
}

impl<'a> UploadExecutor<'a> {
    pub fn new(
        http: &'a reqwest::Client,
        http_direct: &'a reqwest::Client,
        config: &'a HostConfig,
        auth: &'a AuthState,
        bandwidth: Arc<BandwidthCounter>,
    ) -> Self {
        Self {
            http,
            http_direct,
            config,
            auth,
            bandwidth,
        }
    }

    /// 执行一次上传，按配置分派到标准或多步路径
    pub async fn upload(&self, file_path: &Path, hooks: UploadHooks) -> Result<UploadResult> {
        let file_size = tokio::fs::metadata(file_path).await?.len();

        // 配置了体积上限的主机先挡掉超限文件，不发请求
        if let Some(limit_mb) = self.config.max_file_size_mb {
            let limit = limit_mb * 1024 * 1024;
            if file_size > limit {
                return Err(HostError::protocol(
                    None,
                    format!(
                        "文件超过主机大小限制: {} bytes > {} MB",
                        file_size, limit_mb
                    ),
                ));
            }
        }

        info!(
            "开始上传: file={:?}, size={}, host={}",
            file_path, file_size, self.config.name
        );

        match &self.config.upload_mode {
            UploadMode::Standard => self.upload_standard(file_path, file_size, hooks).await,
            UploadMode::MultiStep(ms) => {
                self.upload_multistep(file_path, file_size, hooks, ms).await
            }
        }
    }

    // =====================================================
    // 标准上传
    // =====================================================

    async fn upload_standard(
        &self,
        file_path: &Path,
        file_size: u64,
        hooks: UploadHooks,
    ) -> Result<UploadResult> {
        let file_name = file_name_of(file_path);

        // 上传地址：先解析动态服务器，再替换文件名占位符
        let mut upload_url = self.config.upload_endpoint.clone();
        if let Some(get_server) = &self.config.get_server {
            upload_url = self.resolve_upload_server(get_server, &upload_url).await?;
        }
        upload_url = upload_url.replace("{filename}", &file_name);

        // 会话主机可能要求带 per-upload 的 sess_id
        let sess_id = if !self.auth.cookie_jar.is_empty() {
            self.resolve_session_id(&upload_url).await?
        } else {
            None
        };

        let observer = Arc::new(TransferObserver::new(
            Arc::clone(&self.bandwidth),
            hooks,
            file_size,
        ));

        // redirect 响应类型要读 Location，不能让客户端替我们跟过去
        let client = if self.config.response_type == ResponseType::Redirect {
            self.http_direct
        } else {
            self.http
        };

        let file = tokio::fs::File::open(file_path).await?;
        let body = Body::wrap_stream(progress_stream(file, Arc::clone(&observer)));

        let mut request = match self.config.method {
            HttpMethod::Put => client.put(&upload_url).timeout(UPLOAD_TIMEOUT).body(body),
            HttpMethod::Post => {
                let part = Part::stream_with_length(body, file_size)
                    .file_name(file_name.clone())
                    .mime_str("application/octet-stream")?;
                let mut form = Form::new().part(self.config.file_field.clone(), part);
                for (field, value) in &self.config.extra_fields {
                    form = form.text(field.clone(), value.clone());
                }
                if let Some(sess_id) = sess_id {
                    form = form.text("sess_id", sess_id);
                }
                client.post(&upload_url).timeout(UPLOAD_TIMEOUT).multipart(form)
            }
        };

        if let Some(authorization) = self.auth.authorization_header(self.config.auth_mode) {
            request = request.header(AUTHORIZATION, authorization);
        }
        if let Some(cookies) = self.auth.cookie_header() {
            request = request.header(COOKIE, cookies);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if observer.was_cancelled() {
                    return Err(HostError::Cancelled);
                }
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // redirect 类型的主机用 3xx 表示成功，其余要求 200/201
        let accepted = if self.config.response_type == ResponseType::Redirect {
            matches!(status, 200 | 201 | 301 | 302 | 303 | 307)
        } else {
            status == 200 || status == 201
        };
        if !accepted {
            return Err(HostError::protocol(
                status,
                format!("上传失败, HTTP {}", status),
            ));
        }

        let body_text = response.text().await?;
        self.parse_standard_response(status, &body_text, location)
    }

    /// 按 response_type 解释标准上传的响应
    fn parse_standard_response(
        &self,
        status: u16,
        body: &str,
        location: Option<String>,
    ) -> Result<UploadResult> {
        match self.config.response_type {
            ResponseType::Json => {
                let raw: Value = serde_json::from_str(body).map_err(|e| {
                    HostError::protocol(status, format!("上传响应解析失败: {}", e))
                })?;

                // 个别主机把单个对象包在数组里
                let data = unwrap_top_level_array(raw.clone());

                let url = match &self.config.link_path {
                    Some(path) => extract_path(&data, path)
                        .and_then(value_to_string)
                        .map(|link| {
                            crate::extract::build_link(
                                &link,
                                &self.config.link_prefix,
                                &self.config.link_suffix,
                                self.config.link_regex.as_ref(),
                            )
                        })
                        .unwrap_or_default(),
                    None => String::new(),
                };

                Ok(UploadResult {
                    url,
                    upload_id: None,
                    deduplicated: false,
                    raw_response: raw,
                })
            }

            ResponseType::Text => Ok(UploadResult {
                url: link_from_text(
                    body,
                    &self.config.link_prefix,
                    &self.config.link_suffix,
                    self.config.link_regex.as_ref(),
                ),
                upload_id: None,
                deduplicated: false,
                raw_response: Value::String(body.to_string()),
            }),

            ResponseType::Redirect => Ok(UploadResult {
                url: location.unwrap_or_default(),
                upload_id: None,
                deduplicated: false,
                raw_response: Value::String(body.to_string()),
            }),
        }
    }

    /// 动态解析上传服务器（get_server 接口），把结果替入 {server} 占位符
    async fn resolve_upload_server(&self, get_server: &str, endpoint: &str) -> Result<String> {
        let response = self
            .http
            .get(get_server)
            .timeout(SERVER_TIMEOUT)
            .send()
            .await?;
        let status = response.status().as_u16();
        let data: Value = response.json().await.map_err(|e| {
            HostError::protocol(status, format!("上传服务器响应解析失败: {}", e))
        })?;

        if let Some(path) = &self.config.server_response_path {
            if let Some(server) = extract_path(&data, path).and_then(value_to_string) {
                debug!("解析到上传服务器: {}", server);
                return Ok(endpoint.replace("{server}", &server));
            }
        }

        // 取不到服务器地址时退回静态 endpoint
        warn!("未能从 get_server 响应中解析服务器地址, 使用静态 endpoint");
        Ok(endpoint.to_string())
    }

    /// 解析会话上传要求的 sess_id
    ///
    /// 两种来源：指定名字的 Cookie 直接用，或抓上传页面按正则提取。
    async fn resolve_session_id(&self, upload_url: &str) -> Result<Option<String>> {
        if let Some(cookie_name) = &self.config.session_cookie_name {
            return match self.auth.cookie_jar.get(cookie_name) {
                Some(value) => {
                    debug!("使用 {} Cookie 作为 sess_id", cookie_name);
                    Ok(Some(value.clone()))
                }
                None => {
                    warn!("Cookie jar 中没有 {} Cookie", cookie_name);
                    Ok(None)
                }
            };
        }

        let Some(regex) = &self.config.session_id_regex else {
            return Ok(None);
        };

        // 上传页面地址：配置优先，否则从上传 endpoint 推一个 /upload 页面
        let page_url = match &self.config.upload_page_url {
            Some(url) => url.clone(),
            None => {
                let base = upload_url
                    .rfind('/')
                    .map(|pos| &upload_url[..pos])
                    .unwrap_or(upload_url);
                format!("{}/upload", base)
            }
        };

        debug!("访问上传页面提取 sess_id: {}", page_url);

        let mut request = self.http.get(&page_url).timeout(SHORT_TIMEOUT);
        if let Some(cookies) = self.auth.cookie_header() {
            request = request.header(COOKIE, cookies);
        }
        let page_html = request.send().await?.text().await?;

        match regex.captures(&page_html).and_then(|c| c.get(1)) {
            Some(group) => {
                debug!("提取到 sess_id: {}...", truncate_for_log(group.as_str(), 20));
                Ok(Some(group.as_str().to_string()))
            }
            None => {
                warn!("未能从上传页面提取 sess_id");
                Ok(None)
            }
        }
    }

    // =====================================================
    // 多步上传：init → transfer → poll
    // =====================================================

    async fn upload_multistep(
        &self,
        file_path: &Path,
        file_size: u64,
        hooks: UploadHooks,
        ms: &MultiStepUpload,
    ) -> Result<UploadResult> {
        let file_name = file_name_of(file_path);
        let token = self.auth.auth_token.clone().unwrap_or_default();

        // 第一步之前：主机要求哈希的话先流式算 MD5，任何网络调用都在其后
        let file_hash = if ms.require_hash {
            debug!("计算文件哈希...");
            Some(hash::md5_file(file_path).await?)
        } else {
            None
        };

        // INIT
        let init_url = ms
            .init_url
            .replace("{filename}", &urlencoding::encode(&file_name))
            .replace("{size}", &file_size.to_string())
            .replace("{token}", &token)
            .replace("{hash}", file_hash.as_deref().unwrap_or(""));

        debug!("初始化上传...");
        let response = self.http.get(&init_url).timeout(SHORT_TIMEOUT).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        // 失败响应也尽量按 JSON 解析，里面往往有更准确的报错
        let init_data: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        if status != 200 {
            let detail = embedded_error_message(&init_data)
                .or_else(|| {
                    extract_path(&init_data, &key_path(&["error"])).and_then(value_to_string)
                })
                .unwrap_or_else(|| truncate_for_log(&body, 200));
            return Err(HostError::protocol(
                status,
                format!("上传初始化失败 (HTTP {}): {}", status, detail),
            ));
        }

        if let Some(api_status) = embedded_status(&init_data) {
            if api_status != 200 {
                let message = embedded_error_message(&init_data)
                    .unwrap_or_else(|| format!("API returned status {}", api_status));
                return Err(HostError::protocol(
                    status,
                    format!("上传初始化失败: {}", message),
                ));
            }
        }

        let upload_url = extract_path(&init_data, &ms.upload_url_path).and_then(value_to_string);
        let upload_id = extract_path(&init_data, &ms.upload_id_path).and_then(value_to_string);
        let upload_state = extract_path(&init_data, &ms.state_path).and_then(|v| v.as_i64());

        // 去重检查：state=2（或没有上传地址却有状态）说明内容已在服务器上，
        // 能拿到现成链接就直接完成，不做任何传输
        if upload_state == Some(2) || (upload_url.is_none() && upload_state.is_some()) {
            if let Some(existing_url) =
                extract_path(&init_data, &ms.dedup_link_path).and_then(value_to_string)
            {
                info!("文件已存在于服务器 (去重命中), 跳过传输");
                return Ok(UploadResult {
                    url: existing_url,
                    upload_id,
                    deduplicated: true,
                    raw_response: init_data,
                });
            }
        }

        let upload_url = upload_url.ok_or_else(|| {
            HostError::protocol(status, "初始化响应中未找到上传地址".to_string())
        })?;
        let upload_id = upload_id.ok_or_else(|| {
            HostError::protocol(status, "初始化响应中未找到 upload_id".to_string())
        })?;
        debug!("获得 upload_id: {}", upload_id);

        // TRANSFER
        debug!("上传文件...");
        let observer = Arc::new(TransferObserver::new(
            Arc::clone(&self.bandwidth),
            hooks,
            file_size,
        ));
        let file = tokio::fs::File::open(file_path).await?;
        let part = Part::stream_with_length(
            Body::wrap_stream(progress_stream(file, Arc::clone(&observer))),
            file_size,
        )
        .file_name(file_name.clone())
        .mime_str("application/octet-stream")?;
        let form = Form::new().part(self.config.file_field.clone(), part);

        let response = match self
            .http
            .post(&upload_url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if observer.was_cancelled() {
                    return Err(HostError::Cancelled);
                }
                return Err(e.into());
            }
        };

        let transfer_status = response.status().as_u16();
        if transfer_status != 200 && transfer_status != 201 {
            return Err(HostError::protocol(
                transfer_status,
                format!("文件上传失败, HTTP {}", transfer_status),
            ));
        }

        // POLL
        match &ms.poll_url {
            Some(poll_url) => {
                self.poll_for_completion(ms, poll_url, &upload_id, &token)
                    .await
            }
            // 无轮询接口的主机：init 响应就是全部结果
            None => Ok(UploadResult {
                url: String::new(),
                upload_id: Some(upload_id),
                deduplicated: false,
                raw_response: init_data,
            }),
        }
    }

    /// 轮询主机的异步处理结果
    async fn poll_for_completion(
        &self,
        ms: &MultiStepUpload,
        poll_url: &str,
        upload_id: &str,
        token: &str,
    ) -> Result<UploadResult> {
        debug!("等待上传处理...");
        let poll_url = poll_url
            .replace("{upload_id}", upload_id)
            .replace("{token}", token);
        let delay = Duration::from_secs_f64(ms.poll_delay);

        tokio::time::sleep(delay).await;

        let mut last_body = String::new();
        for attempt in 0..ms.poll_retries {
            let response = self.http.get(&poll_url).timeout(SHORT_TIMEOUT).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            last_body = body.clone();

            let poll_data: Value = serde_json::from_str(&body).map_err(|e| {
                HostError::protocol(status, format!("轮询响应解析失败: {}", e))
            })?;

            debug!(
                "轮询 {}/{}: {}",
                attempt + 1,
                ms.poll_retries,
                truncate_for_log(&body, 200)
            );

            // 最终链接出现即完成
            if let Some(path) = &self.config.link_path {
                if let Some(url) = extract_path(&poll_data, path).and_then(value_to_string) {
                    info!("上传完成");
                    return Ok(UploadResult {
                        url,
                        upload_id: Some(upload_id.to_string()),
                        deduplicated: false,
                        raw_response: poll_data,
                    });
                }
            }

            // state=2 表示处理完了，但最终链接的位置各主机不统一，按候选列表顺序找
            let state = extract_path(&poll_data, &ms.state_path).and_then(|v| v.as_i64());
            if state == Some(2) {
                for candidate in &ms.poll_link_paths {
                    if let Some(url) = extract_path(&poll_data, candidate).and_then(value_to_string)
                    {
                        info!("上传完成 (state 2, 候选路径)");
                        return Ok(UploadResult {
                            url,
                            upload_id: Some(upload_id.to_string()),
                            deduplicated: false,
                            raw_response: poll_data,
                        });
                    }
                }
            }

            if attempt + 1 < ms.poll_retries {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            "轮询超时, 最后响应: {}",
            truncate_for_log(&last_body, 200)
        );
        Err(HostError::PollTimeout {
            upload_id: upload_id.to_string(),
            last_response: last_body,
        })
    }
}

/// 取文件名（无法取到时退回整个路径的文本形式）
fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// 日志里放响应片段用的安全截断
fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
