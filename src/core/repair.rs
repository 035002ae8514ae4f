//! 有界自动修复：参数别名重命名与最近工具推断
//!
//! 模型偶尔会写错参数名（target 而非 target_ip）或编造工具名。修复逻辑被限定为
//! 一张可枚举的别名表与基于参数形态的单次推断，每种失败只重试一次；
//! 每次修正都由引擎记入审计事件。别名按表中声明顺序优先匹配，避免依赖
//! 迭代顺序的不确定行为。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::session::JsonMap;

/// 参数别名表：(正确参数名, 按优先级排列的别名)
pub const PARAM_ALIASES: &[(&str, &[&str])] = &[
    ("target_ip", &["target", "ip", "host", "hostname", "address"]),
    ("ip_address", &["ip", "address", "target_ip", "target"]),
    ("ports", &["port", "port_range"]),
    ("filepath", &["file", "path", "filename"]),
    ("content", &["text", "data", "message"]),
];

/// 从归一化的错误文本中提取缺失参数名
pub fn missing_parameter(error: &str) -> Option<String> {
    static CN_RE: OnceLock<Regex> = OnceLock::new();
    static EN_RE: OnceLock<Regex> = OnceLock::new();
    let cn = CN_RE.get_or_init(|| Regex::new(r"缺少必需参数[：:]\s*(\w+)").expect("param regex"));
    if let Some(c) = cn.captures(error) {
        return Some(c[1].to_string());
    }
    let en = EN_RE.get_or_init(|| {
        Regex::new(r#"(?i)missing.*?argument[:\s]+['"]?(\w+)"#).expect("param regex")
    });
    en.captures(error).map(|c| c[1].to_string())
}

/// 按别名表重命名参数：返回修正后的参数表；无可用别名时返回 None
pub fn rename_argument(required: &str, args: &JsonMap) -> Option<JsonMap> {
    let (_, aliases) = PARAM_ALIASES.iter().find(|(name, _)| *name == required)?;
    for alias in aliases.iter() {
        if let Some(value) = args.get(*alias) {
            let mut fixed = args.clone();
            fixed.insert(required.to_string(), value.clone());
            if *alias != required {
                fixed.remove(*alias);
            }
            return Some(fixed);
        }
    }
    None
}

/// 从文本中提取首个 IPv4 地址
pub fn extract_ipv4(text: &str) -> Option<String> {
    static IP_RE: OnceLock<Regex> = OnceLock::new();
    let re = IP_RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ip regex"));
    re.find(text).map(|m| m.as_str().to_string())
}

/// 工具名不存在时按参数形态推断最近的已注册工具
///
/// 命中规则：参数里出现 IP 且动作/参数提到 ping -> network_ping；
/// 提到 nmap 或 scan -> port_scan。推断出的名字必须在 known 中。
pub fn infer_capability(
    action: &str,
    args: &JsonMap,
    known: &[String],
) -> Option<(String, JsonMap)> {
    let args_text = serde_json::to_string(args).unwrap_or_default();
    let haystack = format!("{} {}", action, args_text).to_lowercase();
    let ip = extract_ipv4(&args_text);

    let (name, fixed) = if haystack.contains("ping") {
        let mut fixed = JsonMap::new();
        fixed.insert("target_ip".to_string(), Value::String(ip?));
        ("network_ping".to_string(), fixed)
    } else if haystack.contains("nmap") || haystack.contains("scan") {
        let mut fixed = JsonMap::new();
        fixed.insert("target_ip".to_string(), Value::String(ip?));
        fixed.insert("ports".to_string(), Value::String("common".to_string()));
        ("port_scan".to_string(), fixed)
    } else {
        return None;
    };

    if known.iter().any(|k| *k == name) {
        Some((name, fixed))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: serde_json::Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_missing_parameter_extraction() {
        assert_eq!(
            missing_parameter("缺少必需参数: target_ip").as_deref(),
            Some("target_ip")
        );
        assert_eq!(
            missing_parameter("missing required argument: 'ports'").as_deref(),
            Some("ports")
        );
        assert!(missing_parameter("connection refused").is_none());
    }

    #[test]
    fn test_rename_target_to_target_ip() {
        let fixed = rename_argument("target_ip", &args(json!({"target": "10.0.0.1"}))).unwrap();
        assert_eq!(fixed["target_ip"], "10.0.0.1");
        assert!(!fixed.contains_key("target"));
    }

    #[test]
    fn test_alias_priority_order_is_declared_order() {
        // target 与 ip 同时存在时，取别名表里靠前的 target
        let fixed = rename_argument(
            "target_ip",
            &args(json!({"ip": "1.1.1.1", "target": "2.2.2.2"})),
        )
        .unwrap();
        assert_eq!(fixed["target_ip"], "2.2.2.2");
        assert!(!fixed.contains_key("target"));
        assert!(fixed.contains_key("ip"));
    }

    #[test]
    fn test_rename_without_alias_gives_none() {
        assert!(rename_argument("target_ip", &args(json!({"foo": "bar"}))).is_none());
        assert!(rename_argument("unknown_param", &args(json!({"target": "x"}))).is_none());
    }

    #[test]
    fn test_infer_ping_from_args_shape() {
        let known = vec!["network_ping".to_string(), "port_scan".to_string()];
        let (name, fixed) = infer_capability(
            "command",
            &args(json!({"cmd": "ping 127.0.0.1"})),
            &known,
        )
        .unwrap();
        assert_eq!(name, "network_ping");
        assert_eq!(fixed["target_ip"], "127.0.0.1");
    }

    #[test]
    fn test_infer_scan_requires_registered_name() {
        let known = vec!["network_ping".to_string()];
        assert!(infer_capability(
            "run_nmap",
            &args(json!({"host": "192.168.0.1"})),
            &known
        )
        .is_none());
    }
}
