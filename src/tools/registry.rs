//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / parameters / sensitive / execute），
//! 由 CapabilityRegistry 按名注册与查找。execute 在调用前校验必需参数，并把处理器
//! 的任何失败归一化为 CapabilityOutcome，绝不向上抛原始错误。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::AgentError;
use crate::core::session::JsonMap;

/// 参数描述符（有序），用于 prompt 构建、参数校验与别名修复
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub required: bool,
    pub description: String,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: false,
            description: description.to_string(),
        }
    }
}

/// 能力执行结果：success / result / error 三元组
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl CapabilityOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// 能力 trait：名称、描述（供 LLM 理解）、参数描述、敏感标记、异步执行
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称（用于 Decision 中的 "action" 字段）
    fn name(&self) -> &str;

    /// 能力描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数描述符，按声明顺序
    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    /// 是否属于敏感操作（安全模式 + 人机协同时需人工确认）
    fn sensitive(&self) -> bool {
        false
    }

    /// 执行能力；失败以 Err(message) 表达，由注册表归一化
    async fn execute(&self, args: &JsonMap) -> Result<Value, String>;
}

/// 能力注册表：按注册顺序存储，供 prompt 生成稳定的目录
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册能力；重名返回 DuplicateCapability
    pub fn register(&mut self, capability: impl Capability + 'static) -> Result<(), AgentError> {
        let name = capability.name().to_string();
        if self.get(&name).is_some() {
            return Err(AgentError::DuplicateCapability(name));
        }
        self.capabilities.push(Arc::new(capability));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.iter().find(|c| c.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.get(name).map(|c| c.sensitive()).unwrap_or(false)
    }

    /// 指定能力的参数描述符
    pub fn schema(&self, name: &str) -> Option<Vec<ToolParameter>> {
        self.get(name).map(|c| c.parameters())
    }

    /// 执行能力：未注册返回 Err(CapabilityNotFound)；否则校验必需参数并归一化结果
    pub async fn execute(&self, name: &str, args: &JsonMap) -> Result<CapabilityOutcome, AgentError> {
        let capability = self
            .get(name)
            .ok_or_else(|| AgentError::CapabilityNotFound(name.to_string()))?;

        for param in capability.parameters() {
            if param.required && !args.contains_key(&param.name) {
                return Ok(CapabilityOutcome::failure(format!(
                    "缺少必需参数: {}",
                    param.name
                )));
            }
        }

        match capability.execute(args).await {
            Ok(result) => Ok(CapabilityOutcome::ok(result)),
            Err(message) => Ok(CapabilityOutcome::failure(message)),
        }
    }

    /// 生成 system prompt 中的能力目录段落（名称、描述、参数及其约束）
    pub fn catalogue_section(&self) -> String {
        let mut out = String::new();
        for cap in &self.capabilities {
            out.push_str(&format!("- **{}**: {}\n", cap.name(), cap.description()));
            let params = cap.parameters();
            if !params.is_empty() {
                out.push_str("  参数（参数名称必须完全匹配）:\n");
                for p in &params {
                    let req = if p.required { "必需" } else { "可选" };
                    out.push_str(&format!(
                        "    - **{}** ({}, {}): {}\n",
                        p.name, p.param_type, req, p.description
                    ));
                }
                let names: Vec<String> = params.iter().map(|p| format!("\"{}\"", p.name)).collect();
                out.push_str(&format!("  参数名称列表: {}\n", names.join(", ")));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct UpperTool;

    #[async_trait]
    impl Capability for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "转大写"
        }

        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::required("text", "string", "输入文本")]
        }

        async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .ok_or("text 必须是字符串")?;
            Ok(json!({"upper": text.to_uppercase()}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Capability for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "总是失败"
        }

        async fn execute(&self, _args: &JsonMap) -> Result<Value, String> {
            Err("内部故障".to_string())
        }
    }

    fn args(v: serde_json::Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut reg = CapabilityRegistry::new();
        reg.register(UpperTool).unwrap();
        let err = reg.register(UpperTool).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateCapability(n) if n == "upper"));
    }

    #[tokio::test]
    async fn test_unknown_capability_is_not_found() {
        let reg = CapabilityRegistry::new();
        let err = reg.execute("nope", &JsonMap::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::CapabilityNotFound(n) if n == "nope"));
    }

    #[tokio::test]
    async fn test_missing_required_param_named_in_error() {
        let mut reg = CapabilityRegistry::new();
        reg.register(UpperTool).unwrap();
        let outcome = reg.execute("upper", &JsonMap::new()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("缺少必需参数: text"));
    }

    #[tokio::test]
    async fn test_handler_fault_normalized() {
        let mut reg = CapabilityRegistry::new();
        reg.register(FailingTool).unwrap();
        let outcome = reg.execute("failing", &JsonMap::new()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("内部故障"));
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let mut reg = CapabilityRegistry::new();
        reg.register(UpperTool).unwrap();
        let outcome = reg
            .execute("upper", &args(json!({"text": "abc"})))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result["upper"], "ABC");
    }

    #[test]
    fn test_catalogue_lists_parameters() {
        let mut reg = CapabilityRegistry::new();
        reg.register(UpperTool).unwrap();
        let section = reg.catalogue_section();
        assert!(section.contains("**upper**"));
        assert!(section.contains("**text**"));
        assert!(section.contains("必需"));
    }
}
