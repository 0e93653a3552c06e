// JSON 路径提取
//
// 主机配置里用 ["response", "upload", 0, "url"] 这样的路径描述
// 返回值在 JSON 中的位置，引擎按路径逐级下钻。
// 约定：任何一级找不到都返回 None，绝不 panic、绝不报错。

use serde_json::Value;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 路径中的一步：字符串索引对象，整数索引数组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    /// 对象键
    Key(String),
    /// 数组下标
    Index(usize),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Key(k) => write!(f, "{}", k),
            PathStep::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// JSON 路径（配置文档中的数组形式直接反序列化）
pub type JsonPath = Vec<PathStep>;

/// 便捷构造：从字符串切片构造纯键路径（测试和默认路径用）
pub fn key_path(keys: &[&str]) -> JsonPath {
    keys.iter().map(|k| PathStep::Key(k.to_string())).collect()
}

/// 按路径提取 JSON 值
///
/// - 字符串步骤索引对象：键不存在或当前值不是对象 ⇒ None
/// - 整数步骤索引数组：越界或当前值不是数组 ⇒ None
/// - 任何一级变成 None 即短路
pub fn extract_path<'a>(data: &'a Value, path: &[PathStep]) -> Option<&'a Value> {
    let mut current = data;
    for step in path {
        current = match step {
            PathStep::Key(key) => current.as_object()?.get(key)?,
            PathStep::Index(idx) => current.as_array()?.get(*idx)?,
        };
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// 顶层数组解包
///
/// 个别主机把单个结果对象包在数组里返回，路径提取前先取第一个元素。
/// 空数组或非数组原样返回。
pub fn unwrap_top_level_array(data: Value) -> Value {
    match data {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    }
}

/// 把提取到的标量渲染成字符串（链接、token、upload_id 都按此规则拼接）
///
/// 对象/数组/null 不可渲染，返回 None
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 把提取到的值按字节数解释（存储容量字段）
///
/// 兼容整数、浮点和数字字符串三种写法
pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_f64().map(|f| f as u64)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<u64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as u64))
        }
        _ => None,
    }
}

/// 把提取到的值按布尔解释（会员状态一类字段，各主机写法不一）
pub fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            Some(!lower.is_empty() && lower != "0" && lower != "false" && lower != "no")
        }
        _ => None,
    }
}

/// 读取 API 响应内嵌的数字 status 字段（部分主机 HTTP 200 也可能业务失败）
pub fn embedded_status(data: &Value) -> Option<i64> {
    data.as_object()?.get("status")?.as_i64()
}

/// 从响应里挖最详细的错误文案
///
/// 常见 API 把人读的错误放在 response.details 或 response.msg 里，
/// 按此顺序取第一个能用的。
pub fn embedded_error_message(data: &Value) -> Option<String> {
    for path in [&["response", "details"][..], &["response", "msg"][..]] {
        let steps: Vec<PathStep> = path.iter().map(|k| PathStep::Key(k.to_string())).collect();
        if let Some(msg) = extract_path(data, &steps).and_then(value_to_string) {
            if !msg.is_empty() {
                return Some(msg);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_extract_path_nested_object() {
        let data = json!({"response": {"upload": {"url": "https://x/y"}}});
        let path = key_path(&["response", "upload", "url"]);
        assert_eq!(
            extract_path(&data, &path),
            Some(&json!("https://x/y"))
        );
    }

    #[test]
    fn test_extract_path_array_index() {
        let data = json!({"files": [{"id": 1}, {"id": 2}]});
        let path = vec![
            PathStep::Key("files".to_string()),
            PathStep::Index(1),
            PathStep::Key("id".to_string()),
        ];
        assert_eq!(extract_path(&data, &path), Some(&json!(2)));
    }

    #[test]
    fn test_extract_path_missing_key_is_none() {
        let data = json!({"a": {"b": 1}});
        assert!(extract_path(&data, &key_path(&["a", "c"])).is_none());
        assert!(extract_path(&data, &key_path(&["x"])).is_none());
    }

    #[test]
    fn test_extract_path_type_mismatch_is_none() {
        let data = json!({"a": "scalar"});
        // 字符串值上继续下钻 ⇒ None
        assert!(extract_path(&data, &key_path(&["a", "b"])).is_none());
        // 对象上用数组下标 ⇒ None
        let path = vec![PathStep::Key("a".to_string()), PathStep::Index(0)];
        assert!(extract_path(&data, &path).is_none());
    }

    #[test]
    fn test_extract_path_out_of_bounds_is_none() {
        let data = json!([1, 2]);
        assert!(extract_path(&data, &[PathStep::Index(5)]).is_none());
    }

    #[test]
    fn test_extract_path_null_short_circuits() {
        let data = json!({"a": null});
        assert!(extract_path(&data, &key_path(&["a"])).is_none());
        assert!(extract_path(&data, &key_path(&["a", "b"])).is_none());
    }

    #[test]
    fn test_empty_path_returns_root() {
        let data = json!({"a": 1});
        assert_eq!(extract_path(&data, &[]), Some(&data));
    }

    #[test]
    fn test_unwrap_top_level_array() {
        let data = json!([{"url": "x"}, {"url": "y"}]);
        assert_eq!(unwrap_top_level_array(data), json!({"url": "x"}));

        // 空数组和对象保持原样
        assert_eq!(unwrap_top_level_array(json!([])), json!([]));
        assert_eq!(unwrap_top_level_array(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(value_to_string(&json!(true)), Some("true".to_string()));
        assert_eq!(value_to_string(&json!({"a": 1})), None);
        assert_eq!(value_to_string(&json!(null)), None);
    }

    #[test]
    fn test_value_to_u64() {
        assert_eq!(value_to_u64(&json!(1024)), Some(1024));
        assert_eq!(value_to_u64(&json!(1024.7)), Some(1024));
        assert_eq!(value_to_u64(&json!("2048")), Some(2048));
        assert_eq!(value_to_u64(&json!("2048.5")), Some(2048));
        assert_eq!(value_to_u64(&json!("abc")), None);
    }

    #[test]
    fn test_embedded_status() {
        assert_eq!(embedded_status(&json!({"status": 200})), Some(200));
        assert_eq!(embedded_status(&json!({"status": 404})), Some(404));
        assert_eq!(embedded_status(&json!({"ok": true})), None);
        assert_eq!(embedded_status(&json!("text")), None);
    }

    #[test]
    fn test_value_to_bool() {
        assert_eq!(value_to_bool(&json!(true)), Some(true));
        assert_eq!(value_to_bool(&json!(0)), Some(false));
        assert_eq!(value_to_bool(&json!(1)), Some(true));
        assert_eq!(value_to_bool(&json!("premium")), Some(true));
        assert_eq!(value_to_bool(&json!("false")), Some(false));
        assert_eq!(value_to_bool(&json!("0")), Some(false));
        assert_eq!(value_to_bool(&json!(null)), None);
    }

    #[test]
    fn test_embedded_error_message_prefers_details() {
        let data = json!({"response": {"details": "quota exceeded", "msg": "error"}});
        assert_eq!(
            embedded_error_message(&data),
            Some("quota exceeded".to_string())
        );

        let data = json!({"response": {"msg": "bad token"}});
        assert_eq!(embedded_error_message(&data), Some("bad token".to_string()));

        assert_eq!(embedded_error_message(&json!({"ok": 1})), None);
    }

    #[test]
    fn test_path_step_deserialize_mixed() {
        let path: JsonPath = serde_json::from_str(r#"["response", "files", 0, "url"]"#).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path[2], PathStep::Index(0));
        assert_eq!(path[3], PathStep::Key("url".to_string()));
    }

    // 任意文档 × 任意路径：提取永不 panic，失败统一表现为 None
    proptest! {
        #[test]
        fn prop_extract_path_never_panics(
            doc in prop::string::string_regex(r#"\{("k":(1|"v"|\[1,2\]|\{"n":2\}))?\}"#).unwrap(),
            steps in prop::collection::vec(
                prop_oneof![
                    prop::string::string_regex("[a-z]{1,3}").unwrap().prop_map(PathStep::Key),
                    (0usize..4).prop_map(PathStep::Index),
                ],
                0..5,
            ),
        ) {
            let value: Value = serde_json::from_str(&doc).unwrap();
            let _ = extract_path(&value, &steps);
        }
    }
}
