//! 决策对象 JSON Schema 生成（schemars）
//!
//! 用于将「合法 Decision」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 决策输出格式：与解释器解析的
/// `{"thought": "...", "plan": [...], "action": "...", "action_input": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionFormat {
    /// 思考过程：分析当前情况与下一步
    pub thought: String,
    /// 完整执行计划，单步任务也用数组
    pub plan: Vec<String>,
    /// 工具名称，或任务完成时的 "final_answer"
    pub action: String,
    /// 动作参数；final_answer 时为 {"answer": "..."}
    pub action_input: HashMap<String, String>,
}

/// 返回决策对象的 JSON Schema 字符串，可拼入 system prompt
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
