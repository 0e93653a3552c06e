// CSS 定位验证码还原
//
// 一类主机的登录页把验证码数字打散在若干 <span> 里，
// 真实顺序靠 padding-left 像素偏移表达，数字本身可能写成
// HTML 数字实体（&#50; = '2'）。按偏移升序拼回原串后，
// 个别主机还要求按固定规则重排再提交。

use crate::config::CaptchaTransform;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn span_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<span[^>]*padding-left:\s*(\d+)px[^>]*>([^<]+)</span>")
            .expect("captcha span regex")
    })
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#(\d+);").expect("html entity regex"))
}

/// 从验证码 HTML 片段还原数字串（未做 transform）
///
/// 提取所有带 padding-left 偏移的 span，按偏移升序拼接。
/// 一个数字都拿不到返回 None。
pub fn digits_from_fragment(fragment: &str) -> Option<String> {
    let mut positions: Vec<(u32, char)> = Vec::new();

    for caps in span_regex().captures_iter(fragment) {
        let Ok(offset) = caps[1].parse::<u32>() else {
            continue;
        };
        let cell = caps[2].trim();

        // 数字实体优先解码，否则取字面字符
        let digit = match entity_regex().captures(cell) {
            Some(entity) => entity[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32),
            None => cell.chars().next(),
        };

        if let Some(d) = digit {
            positions.push((offset, d));
        }
    }

    if positions.is_empty() {
        return None;
    }

    positions.sort_by_key(|(offset, _)| *offset);
    Some(positions.into_iter().map(|(_, d)| d).collect())
}

/// 按配置的规则重排验证码
pub fn apply_transform(raw: &str, transform: CaptchaTransform) -> String {
    match transform {
        CaptchaTransform::Identity => raw.to_string(),
        CaptchaTransform::Reverse => raw.chars().rev().collect(),
        CaptchaTransform::Move3rdToFront => {
            let chars: Vec<char> = raw.chars().collect();
            if chars.len() < 3 {
                return raw.to_string();
            }
            let mut out = String::with_capacity(raw.len());
            out.push(chars[2]);
            out.extend(&chars[..2]);
            out.extend(&chars[3..]);
            out
        }
    }
}

/// 在登录页 HTML 上完整求解验证码
///
/// 用配置的 captcha_regex 定位验证码区域，还原数字串，套用 transform。
/// 任何一步失败都只告警返回 None（由登录流程决定是否继续）。
pub fn solve(page_html: &str, captcha_regex: &Regex, transform: CaptchaTransform) -> Option<String> {
    let area = match captcha_regex.find(page_html) {
        Some(m) => m.as_str(),
        None => {
            warn!("验证码正则未匹配到登录页面");
            return None;
        }
    };

    match digits_from_fragment(area) {
        Some(raw) => {
            let solved = apply_transform(&raw, transform);
            debug!("验证码求解: {} -> {} (按 CSS 偏移排序)", raw, solved);
            Some(solved)
        }
        None => {
            warn!("验证码区域中未提取到任何数字");
            None
        }
    }
}
