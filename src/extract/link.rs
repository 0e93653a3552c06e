// 下载链接拼装
//
// url = prefix + 原始值 + suffix。
// 配置了 link_regex 时，正则作用在【拼装完成后】的字符串上；
// 只有命中捕获组才用 group(1) 重新套一遍前后缀，整体匹配不算。
// 这个顺序是既有主机配置约定的一部分，必须保持。

use regex::Regex;

/// 根据前后缀和可选正则拼装最终链接
pub fn build_link(raw: &str, prefix: &str, suffix: &str, regex: Option<&Regex>) -> String {
    let templated = format!("{}{}{}", prefix, raw, suffix);

    if let Some(re) = regex {
        if let Some(caps) = re.captures(&templated) {
            if let Some(group) = caps.get(1) {
                return format!("{}{}{}", prefix, group.as_str(), suffix);
            }
        }
    }

    templated
}

/// 纯文本响应的链接提取：命中捕获组用 group(1)，否则用整体匹配
pub fn link_from_text(body: &str, prefix: &str, suffix: &str, regex: Option<&Regex>) -> String {
    match regex {
        Some(re) => match re.captures(body) {
            Some(caps) => {
                let core = caps
                    .get(1)
                    .map(|g| g.as_str())
                    .unwrap_or_else(|| caps.get(0).map(|g| g.as_str()).unwrap_or(""));
                format!("{}{}{}", prefix, core, suffix)
            }
            None => String::new(),
        },
        // 未配置正则：整个响应体去掉首尾空白就是链接
        None => body.trim().to_string(),
    }
}
