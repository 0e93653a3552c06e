// HTML 响应解析辅助
//
// 会话登录和部分主机的用户信息页面只有 HTML 可用，
// 这里集中放隐藏表单域提取和存储容量正则解析。

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 存储容量快照（字节）
///
/// 登录响应里顺带返回的容量、/info 接口、HTML 页面解析共用此结构
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSnapshot {
    /// 总容量
    pub total: Option<u64>,
    /// 已用容量
    pub used: Option<u64>,
    /// 剩余容量
    pub left: Option<u64>,
}

impl StorageSnapshot {
    /// 是否有任何字段被填充
    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.used.is_none() && self.left.is_none()
    }
}

fn hidden_input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<input[^>]+type=["']hidden["'][^>]*>"#).expect("hidden input regex")
    })
}

fn attr_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"name=["']([^"']+)["']"#).expect("name attr regex"))
}

fn attr_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"value=["']([^"']*)["']"#).expect("value attr regex"))
}

/// 提取页面中所有 `<input type="hidden">` 字段
///
/// 登录页自带的 CSRF token、rand 等都靠这里收集，
/// 没有 value 属性的字段取空字符串。
pub fn hidden_form_fields(html: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    for tag in hidden_input_regex().find_iter(html) {
        let tag = tag.as_str();
        let Some(name) = attr_name_regex()
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        let value = attr_value_regex()
            .captures(tag)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        fields.insert(name, value);
    }

    fields
}

/// 从 HTML 页面按正则提取存储容量
///
/// 正则必须暴露两个捕获组 (used_gb, total_gb)，单位 GB，
/// 例如 "566.87 of 10240 GB" 配 `([\d.]+) of ([\d.]+) GB`。
/// 不匹配不算致命错误，记日志返回 None。
pub fn extract_storage_from_html(html: &str, regex: &Regex) -> Option<StorageSnapshot> {
    let caps = match regex.captures(html) {
        Some(caps) => caps,
        None => {
            warn!("存储正则未匹配到 HTML 响应 (长度 {} 字节)", html.len());
            return None;
        }
    };

    let used_gb: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total_gb: f64 = caps.get(2)?.as_str().parse().ok()?;

    let total_bytes = (total_gb * GIB) as u64;
    let used_bytes = (used_gb * GIB) as u64;
    // left 由两个整数相减得出，保证 left + used == total 精确成立
    let left_bytes = total_bytes.saturating_sub(used_bytes);

    Some(StorageSnapshot {
        total: Some(total_bytes),
        used: Some(used_bytes),
        left: Some(left_bytes),
    })
}
