// 认证引擎
//
// 按 HostConfig 描述的认证方式建立 AuthState：
// - token_login: GET 登录接口换令牌，参与全局令牌缓存
// - session: 两段式会话登录（收 Cookie → 提取隐藏域/验证码 → POST 表单）
// - bearer/basic: 凭证本身就是令牌，只影响请求头
//
// 引擎内部不做登录重试；登录失败由调用方决定是否整体重来。

use crate::auth::captcha;
use crate::auth::token_cache::TokenCache;
use crate::config::{AuthMode, HostConfig};
use crate::error::{HostError, Result};
use crate::extract::{
    self, embedded_error_message, embedded_status, extract_path, hidden_form_fields,
    value_to_string, value_to_u64, StorageSnapshot,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// 登录类请求超时
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 单个客户端实例的认证状态
///
/// 由该实例独占，重新登录时整体替换，不做增量修补。
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    /// 登录换取的令牌（token_login / bearer / basic）
    pub auth_token: Option<String>,
    /// 会话 Cookie（name → value）
    pub cookie_jar: BTreeMap<String, String>,
    /// 登录响应里顺带抓到的存储容量（省一次 /info 调用）
    pub storage_from_login: Option<StorageSnapshot>,
}

impl AuthState {
    /// 拼 Cookie 请求头；无 Cookie 返回 None
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookie_jar.is_empty() {
            return None;
        }
        Some(
            self.cookie_jar
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// 从响应头收割 Set-Cookie 合入 jar（只取第一个分号前的 name=value）
    pub fn harvest_cookies(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            let pair = raw.split(';').next().unwrap_or("").trim();
            if let Some((name, value)) = pair.split_once('=') {
                self.cookie_jar
                    .insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    /// 按认证方式生成 Authorization 请求头
    pub fn authorization_header(&self, mode: AuthMode) -> Option<String> {
        let token = self.auth_token.as_deref()?;
        match mode {
            AuthMode::Bearer | AuthMode::ApiKeyOrSession => {
                Some(format!("Bearer {}", token))
            }
            AuthMode::Basic => {
                let encoded = BASE64.encode(format!(":{}", token));
                Some(format!("Basic {}", encoded))
            }
            _ => None,
        }
    }
}

/// 认证引擎（借用客户端和配置，按需建立 AuthState）
pub struct AuthEngine<'a> {
    /// 跟随重定向的客户端（token 登录等常规接口）
    http: &'a reqwest::Client,
    /// 不跟随重定向的客户端（会话登录要亲手收 Set-Cookie / 302）
    http_direct: &'a reqwest::Client,
    config: &'a HostConfig,
}

impl<'a> AuthEngine<'a> {
    pub fn new(
        http: &'a reqwest::Client,
        http_direct: &'a reqwest::Client,
        config: &'a HostConfig,
    ) -> Self {
        Self {
            http,
            http_direct,
            config,
        }
    }

    /// 按配置的认证方式建立认证状态
    ///
    /// token_login 主机提供 host_id 时参与令牌缓存：
    /// 命中直接复用，未命中登录后回填。
    pub async fn establish(
        &self,
        credentials: Option<&str>,
        host_id: Option<&str>,
        token_cache: &TokenCache,
    ) -> Result<AuthState> {
        if !self.config.requires_auth {
            return Ok(AuthState::default());
        }
        let Some(credentials) = credentials else {
            // 没给凭证就不登录，后续需要认证的操作自然失败
            debug!("主机 {} 需要认证但未提供凭证, 跳过登录", self.config.name);
            return Ok(AuthState::default());
        };

        match self.config.auth_mode {
            AuthMode::None => Ok(AuthState::default()),

            AuthMode::Bearer | AuthMode::Basic => Ok(AuthState {
                auth_token: Some(credentials.to_string()),
                ..Default::default()
            }),

            AuthMode::TokenLogin => {
                if let Some(host_id) = host_id {
                    if let Some(cached) = token_cache.get(host_id) {
                        debug!("使用缓存令牌: {}", self.config.name);
                        return Ok(AuthState {
                            auth_token: Some(cached),
                            ..Default::default()
                        });
                    }
                    let state = self.token_login(credentials).await?;
                    if let Some(token) = &state.auth_token {
                        token_cache.store(host_id, token, self.config.token_ttl);
                    }
                    Ok(state)
                } else {
                    // 无 host_id 不参与缓存，直接登录
                    self.token_login(credentials).await
                }
            }

            AuthMode::Session => self.session_login(credentials).await,

            // 凭证带冒号按会话登录，否则当作 API key
            AuthMode::ApiKeyOrSession => {
                if credentials.contains(':') {
                    self.session_login(credentials).await
                } else {
                    Ok(AuthState {
                        auth_token: Some(credentials.to_string()),
                        ..Default::default()
                    })
                }
            }
        }
    }

    /// token 登录：GET 登录接口，校验内嵌状态，按路径取令牌
    pub async fn token_login(&self, credentials: &str) -> Result<AuthState> {
        let (username, password) = split_credentials(&self.config.name, credentials)?;

        let login_url = self
            .config
            .login_url
            .as_deref()
            .ok_or_else(|| {
                HostError::Config(format!("主机 {} 缺少 login_url", self.config.name))
            })?;
        let token_path = self.config.token_path.as_ref().ok_or_else(|| {
            HostError::Config(format!("主机 {} 缺少 token_path", self.config.name))
        })?;

        // login_fields 渲染进查询串
        let fields = render_login_fields(&self.config.login_fields, &username, &password);
        let url = if fields.is_empty() {
            login_url.to_string()
        } else {
            let query = fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", login_url, query)
        };

        debug!("登录 {} ...", self.config.name);

        let response = self.http.get(&url).timeout(LOGIN_TIMEOUT).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(HostError::Auth(format!(
                "{} 登录失败, HTTP {}",
                self.config.name, status
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| {
            HostError::Auth(format!("{} 登录响应不是合法 JSON: {}", self.config.name, e))
        })?;

        // HTTP 200 也可能业务失败，看内嵌 status
        if let Some(api_status) = embedded_status(&data) {
            if api_status != 200 {
                let message = embedded_error_message(&data)
                    .unwrap_or_else(|| format!("API returned status {}", api_status));
                return Err(HostError::Auth(format!(
                    "{} 登录失败: {}",
                    self.config.name, message
                )));
            }
        }

        let token = extract_path(&data, token_path)
            .and_then(value_to_string)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                HostError::Auth(format!(
                    "{} 登录响应中未找到令牌 (路径不匹配)",
                    self.config.name
                ))
            })?;

        // 登录响应里顺带抓存储容量，省掉一次 /info
        let storage = self.storage_from_value(&data);
        if let Some(snap) = &storage {
            debug!("登录时顺带缓存存储容量: {:?}", snap);
        }

        info!("登录成功: {}", self.config.name);

        Ok(AuthState {
            auth_token: Some(token),
            cookie_jar: BTreeMap::new(),
            storage_from_login: storage,
        })
    }

    /// 会话登录：GET 登录页收 Cookie/隐藏域/验证码 → POST 表单
    pub async fn session_login(&self, credentials: &str) -> Result<AuthState> {
        let (username, password) = split_credentials(&self.config.name, credentials)?;

        let login_url = self
            .config
            .login_url
            .as_deref()
            .ok_or_else(|| {
                HostError::Config(format!("主机 {} 缺少 login_url", self.config.name))
            })?;

        debug!("会话登录 {} ...", self.config.name);

        let mut state = AuthState::default();

        // 第一步：GET 登录页，建立初始 Cookie，收集页面自带的隐藏域
        let page = self
            .http_direct
            .get(login_url)
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await?;
        state.harvest_cookies(page.headers());
        let page_html = page.text().await?;

        let hidden = hidden_form_fields(&page_html);
        debug!(
            "提取到 {} 个隐藏表单域: {:?}",
            hidden.len(),
            hidden.keys().collect::<Vec<_>>()
        );

        // 可选验证码
        let captcha_code = match &self.config.captcha_regex {
            Some(re) => captcha::solve(&page_html, re, self.config.captcha_transform),
            None => None,
        };

        // 第二步：隐藏域 ∪ 渲染后的登录字段 ∪ 验证码，POST 表单
        let mut form: BTreeMap<String, String> = hidden;
        for (k, v) in render_login_fields(&self.config.login_fields, &username, &password) {
            form.insert(k, v);
        }
        if let Some(code) = captcha_code {
            form.insert(self.config.captcha_field.clone(), code);
        }

        let mut request = self
            .http_direct
            .post(login_url)
            .timeout(LOGIN_TIMEOUT)
            .form(&form);
        if let Some(cookies) = state.cookie_header() {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status != 200 && status != 302 {
            return Err(HostError::Auth(format!(
                "{} 登录失败, HTTP {}",
                self.config.name, status
            )));
        }
        state.harvest_cookies(response.headers());

        if state.cookie_jar.is_empty() {
            return Err(HostError::Auth(format!(
                "{} 登录失败: 未收到会话 Cookie",
                self.config.name
            )));
        }

        info!("登录成功: {}", self.config.name);
        Ok(state)
    }

    /// 按配置的存储路径从 JSON 里抓容量快照
    fn storage_from_value(&self, data: &serde_json::Value) -> Option<StorageSnapshot> {
        let pick = |path: &Option<extract::JsonPath>| {
            path.as_ref()
                .and_then(|p| extract_path(data, p))
                .and_then(value_to_u64)
        };

        let snap = StorageSnapshot {
            total: pick(&self.config.storage_total_path),
            used: pick(&self.config.storage_used_path),
            left: pick(&self.config.storage_left_path),
        };

        if snap.is_empty() {
            None
        } else {
            Some(snap)
        }
    }
}

/// 拆分 username:password 凭证（只按第一个冒号切）
fn split_credentials(host_name: &str, credentials: &str) -> Result<(String, String)> {
    match credentials.split_once(':') {
        Some((user, pass)) => Ok((user.to_string(), pass.to_string())),
        None => Err(HostError::Auth(format!(
            "{} 需要 'username:password' 格式的凭证",
            host_name
        ))),
    }
}

/// 渲染登录字段模板（{username} / {password} 占位符）
fn render_login_fields(
    templates: &BTreeMap<String, String>,
    username: &str,
    password: &str,
) -> BTreeMap<String, String> {
    templates
        .iter()
        .map(|(field, template)| {
            let value = template
                .replace("{username}", username)
                .replace("{password}", password);
            (field.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_split_credentials() {
        let (u, p) = split_credentials("h", "alice:secret").unwrap();
        assert_eq!(u, "alice");
        assert_eq!(p, "secret");

        // 密码里的冒号保留
        let (u, p) = split_credentials("h", "alice:se:cret").unwrap();
        assert_eq!(u, "alice");
        assert_eq!(p, "se:cret");

        assert!(matches!(
            split_credentials("h", "no-colon"),
            Err(HostError::Auth(_))
        ));
    }

    #[test]
    fn test_render_login_fields() {
        let mut templates = BTreeMap::new();
        templates.insert("login".to_string(), "{username}".to_string());
        templates.insert("pass".to_string(), "{password}".to_string());
        templates.insert("op".to_string(), "do_login".to_string());

        let fields = render_login_fields(&templates, "alice", "pw");
        assert_eq!(fields.get("login"), Some(&"alice".to_string()));
        assert_eq!(fields.get("pass"), Some(&"pw".to_string()));
        assert_eq!(fields.get("op"), Some(&"do_login".to_string()));
    }

    #[test]
    fn test_harvest_cookies_and_header() {
        let mut state = AuthState::default();
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("sess=abc123; Path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("xfss=tok; Secure"));

        state.harvest_cookies(&headers);
        assert_eq!(state.cookie_jar.get("sess"), Some(&"abc123".to_string()));
        assert_eq!(state.cookie_jar.get("xfss"), Some(&"tok".to_string()));
        assert_eq!(state.cookie_header(), Some("sess=abc123; xfss=tok".to_string()));
    }

    #[test]
    fn test_harvest_cookies_overwrites_same_name() {
        let mut state = AuthState::default();
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sess=old"));
        state.harvest_cookies(&headers);

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sess=new; Path=/"));
        state.harvest_cookies(&headers);
        assert_eq!(state.cookie_jar.get("sess"), Some(&"new".to_string()));
    }

    #[test]
    fn test_empty_jar_cookie_header_is_none() {
        assert_eq!(AuthState::default().cookie_header(), None);
    }

    #[test]
    fn test_authorization_header_bearer_and_basic() {
        let state = AuthState {
            auth_token: Some("tok123".to_string()),
            ..Default::default()
        };
        assert_eq!(
            state.authorization_header(AuthMode::Bearer),
            Some("Bearer tok123".to_string())
        );

        // basic: base64(":" + token)
        let basic = state.authorization_header(AuthMode::Basic).unwrap();
        let encoded = basic.strip_prefix("Basic ").unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), b":tok123");

        // 会话/令牌登录不生成 Authorization
        assert_eq!(state.authorization_header(AuthMode::Session), None);
        assert_eq!(state.authorization_header(AuthMode::TokenLogin), None);
    }

    #[test]
    fn test_authorization_header_without_token() {
        assert_eq!(
            AuthState::default().authorization_header(AuthMode::Bearer),
            None
        );
    }
}
