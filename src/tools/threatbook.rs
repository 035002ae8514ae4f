//! 微步在线 IP 威胁情报查询工具
//!
//! 查询 IP 的威胁等级、判定标签与地理信息。API Key 来自配置或环境变量
//! THREATBOOK_API_KEY；查询属于只读操作，不标记为敏感。

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::session::JsonMap;
use crate::tools::{Capability, ToolParameter};

const THREATBOOK_ENDPOINT: &str = "https://api.threatbook.cn/v3/scene/ip_reputation";

/// IP 威胁情报查询工具
pub struct ThreatBookIpQueryTool {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl ThreatBookIpQueryTool {
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.or_else(|| std::env::var("THREATBOOK_API_KEY").ok());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: THREATBOOK_ENDPOINT.to_string(),
        }
    }

    /// 测试用：指向本地模拟端点
    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl Capability for ThreatBookIpQueryTool {
    fn name(&self) -> &str {
        "threatbook_ip_query"
    }

    fn description(&self) -> &str {
        "查询 IP 地址的威胁情报信息，包括地理位置、风险等级、威胁标签等。使用微步在线 (ThreatBook) API。"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "ip_address",
            "string",
            "要查询的 IP 地址",
        )]
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let api_key = self.api_key.as_deref().ok_or(
            "未配置 ThreatBook API Key。请设置环境变量 THREATBOOK_API_KEY 或在 config/default.toml 中配置。",
        )?;
        let ip_address = args
            .get("ip_address")
            .and_then(Value::as_str)
            .ok_or("ip_address 必须是字符串")?;
        if ip_address.parse::<IpAddr>().is_err() {
            return Err(format!("无效的 IP 地址格式: {}", ip_address));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("apikey", api_key), ("resource", ip_address)])
            .send()
            .await
            .map_err(|e| format!("API 请求失败: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(format!("API 请求失败: HTTP {} - {}", status.as_u16(), preview));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("API 响应解析失败: {}", e))?;

        if body.get("response_code").and_then(Value::as_i64) != Some(0) {
            let msg = body
                .get("verbose_msg")
                .and_then(Value::as_str)
                .unwrap_or("未知错误");
            return Err(format!("ThreatBook API 错误: {}", msg));
        }

        let data = body.get("data").cloned().unwrap_or_else(|| json!({}));
        // v3 场景接口按 IP 嵌套返回
        let info = data.get(ip_address).cloned().unwrap_or(data);
        let basic = info.get("basic").cloned().unwrap_or_else(|| json!({}));
        let location = basic.get("location").cloned().unwrap_or_else(|| json!({}));

        Ok(json!({
            "ip_address": ip_address,
            "is_malicious": info.get("is_malicious").and_then(Value::as_bool).unwrap_or(false),
            "severity": info.get("severity").and_then(Value::as_str).unwrap_or("unknown"),
            "judgments": info.get("judgments").cloned().unwrap_or_else(|| json!([])),
            "tags_classes": info.get("tags_classes").cloned().unwrap_or_else(|| json!([])),
            "scene": info.get("scene").and_then(Value::as_str).unwrap_or(""),
            "confidence_level": info.get("confidence_level").and_then(Value::as_str).unwrap_or(""),
            "location": {
                "country": location.get("country").and_then(Value::as_str).unwrap_or(""),
                "province": location.get("province").and_then(Value::as_str).unwrap_or(""),
                "city": location.get("city").and_then(Value::as_str).unwrap_or(""),
            },
            "update_time": info.get("update_time").and_then(Value::as_str).unwrap_or(""),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: serde_json::Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let mut tool = ThreatBookIpQueryTool::new(None);
        // 环境变量可能存在；强制清空以测试缺失分支
        tool.api_key = None;
        let err = tool
            .execute(&args(serde_json::json!({"ip_address": "1.2.3.4"})))
            .await
            .unwrap_err();
        assert!(err.contains("API Key"));
    }

    #[tokio::test]
    async fn test_invalid_ip_rejected_before_request() {
        let tool =
            ThreatBookIpQueryTool::new(Some("test-key".into())).with_endpoint("http://127.0.0.1:9");
        let err = tool
            .execute(&args(serde_json::json!({"ip_address": "not-an-ip"})))
            .await
            .unwrap_err();
        assert!(err.contains("无效的 IP 地址格式"));
    }
}
