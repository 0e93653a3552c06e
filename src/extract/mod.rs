// 通用响应提取模块
//
// 引擎不为任何主机写专用解析代码，所有响应都通过
// JSON 路径 / 正则 / 链接模板这三类纯函数来解释。

pub mod html;
pub mod json;
pub mod link;

pub use html::{extract_storage_from_html, hidden_form_fields, StorageSnapshot};
pub use json::{
    embedded_error_message, embedded_status, extract_path, key_path, unwrap_top_level_array,
    value_to_bool, value_to_string, value_to_u64, JsonPath, PathStep,
};
pub use link::{build_link, link_from_text};
