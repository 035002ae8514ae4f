//! 模型输出解释器：从原始文本中提取结构化 Decision
//!
//! 解析策略按序尝试，首个成功者生效：
//! 1. 整段文本直接解析
//! 2. 第一个 ``` 围栏块内容
//! 3. 第一个括号配平的 {...} 片段
//! 4. 按 thought/plan/action/action_input 四键做宽容抽取
//!
//! 失败时只携带前 200 字符预览（完整文本已作为 assistant 消息留在会话中）。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::error::AgentError;
use crate::core::session::{Decision, JsonMap};

/// ParseError 预览上限（字符）
pub const PARSE_PREVIEW_CHARS: usize = 200;

/// 截取有界预览
pub fn preview(text: &str) -> String {
    let p: String = text.chars().take(PARSE_PREVIEW_CHARS).collect();
    if text.chars().count() > PARSE_PREVIEW_CHARS {
        format!("{}...", p)
    } else {
        p
    }
}

/// 严格解析：四策略依次尝试，全部失败返回 ParseError
pub fn parse(text: &str) -> Result<Decision, AgentError> {
    let trimmed = text.trim();

    for candidate in candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(decision) = strict_decision(&value) {
                return Ok(decision);
            }
        }
    }

    Err(AgentError::ParseError {
        preview: preview(trimmed),
    })
}

/// 浅层自动修复：取首个可解析的 JSON 片段做宽容转换
/// （plan 为裸字符串时包装成单元素列表；action_input 缺失时补空表）
pub fn repair(text: &str) -> Option<Decision> {
    let trimmed = text.trim();
    for candidate in candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(decision) = lenient_decision(&value) {
                return Some(decision);
            }
        }
    }
    None
}

/// 各策略的候选 JSON 字符串（按解析优先级排列）
fn candidates(trimmed: &str) -> Vec<String> {
    let mut out = Vec::new();
    out.push(trimmed.to_string());
    if let Some(fenced) = extract_fenced(trimmed) {
        out.push(fenced);
    }
    if let Some(braced) = extract_braced(trimmed) {
        out.push(braced);
    }
    if let Some(keyed) = extract_by_keys(trimmed) {
        out.push(keyed);
    }
    out
}

/// 策略 2：``` 或 ```json 围栏块内容
fn extract_fenced(text: &str) -> Option<String> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex"));
    re.captures(text).map(|c| c[1].to_string())
}

/// 策略 3：首个括号配平的 {...} 片段（忽略字符串内的括号这一层面交给 JSON 解析器兜底）
fn extract_braced(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let s = start?;
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// 策略 4：四个必需键同时出现的扁平对象
fn extract_by_keys(text: &str) -> Option<String> {
    static KEYS_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEYS_RE.get_or_init(|| {
        Regex::new(
            r#"(?s)\{[^{}]*"thought".*?"plan".*?"action".*?"action_input".*?\}"#,
        )
        .expect("keys regex")
    });
    re.find(text).map(|m| m.as_str().to_string())
}

/// 严格转换：thought/action 必须是字符串，plan 必须是数组或字符串，action_input 必须是对象或缺省
fn strict_decision(value: &Value) -> Option<Decision> {
    let obj = value.as_object()?;
    let thought = obj.get("thought")?.as_str()?.to_string();
    let action = obj.get("action")?.as_str()?.to_string();
    let plan = plan_from(obj.get("plan")?)?;
    let action_input = match obj.get("action_input") {
        Some(Value::Object(map)) => map.clone(),
        None => JsonMap::new(),
        Some(_) => return None,
    };
    Some(Decision {
        thought,
        plan,
        action,
        action_input,
    })
}

/// 宽容转换：只要求 action；thought 可缺省，plan 可为裸字符串或缺省
fn lenient_decision(value: &Value) -> Option<Decision> {
    let obj = value.as_object()?;
    let action = obj.get("action")?.as_str()?.to_string();
    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let plan = match obj.get("plan") {
        Some(v) => plan_from(v).unwrap_or_default(),
        None => Vec::new(),
    };
    let action_input = match obj.get("action_input") {
        Some(Value::Object(map)) => map.clone(),
        _ => JsonMap::new(),
    };
    Some(Decision {
        thought,
        plan,
        action,
        action_input,
    })
}

/// plan 字段：字符串数组，或被强制为单元素列表的裸字符串
fn plan_from(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => {
            let mut plan = Vec::with_capacity(items.len());
            for item in items {
                plan.push(item.as_str()?.to_string());
            }
            Some(plan)
        }
        _ => None,
    }
}
