//! 通知工具：把消息投递到配置的 webhook 渠道
//!
//! 支持企业微信群机器人（wechat）、第三方 IM（im）与通用 webhook（webhook / email
//! 网关）。各渠道的地址来自配置 [tools.notification]；未配置的渠道直接报错。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::NotificationSection;
use crate::core::session::JsonMap;
use crate::tools::{Capability, ToolParameter};

/// 通知投递工具
pub struct NotificationTool {
    client: reqwest::Client,
    channels: NotificationSection,
}

impl NotificationTool {
    pub fn new(channels: NotificationSection) -> Self {
        Self {
            client: reqwest::Client::new(),
            channels,
        }
    }

    async fn post(&self, url: &str, payload: Value) -> Result<(), String> {
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("通知发送失败: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("通知发送失败: HTTP {}", status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for NotificationTool {
    fn name(&self) -> &str {
        "notification"
    }

    fn description(&self) -> &str {
        "发送通知消息到指定渠道。支持 wechat（企业微信群机器人）、im（第三方 IM）、webhook / email（通用 HTTP 网关）。"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("message", "string", "要发送的消息内容"),
            ToolParameter::optional(
                "channel",
                "string",
                "通知渠道：wechat（默认）、im、webhook、email",
            ),
            ToolParameter::optional("recipients", "array", "接收者列表（渠道相关）"),
            ToolParameter::optional("subject", "string", "消息主题（主要用于 email 网关）"),
        ]
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .ok_or("消息内容不能为空")?;
        let channel = args
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("wechat");
        let recipients: Vec<String> = args
            .get("recipients")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let subject = args.get("subject").and_then(Value::as_str);

        match channel {
            "wechat" => {
                let url = self
                    .channels
                    .wechat_webhook
                    .as_deref()
                    .ok_or("未配置企业微信 webhook（[tools.notification].wechat_webhook）")?;
                self.post(url, json!({"msgtype": "text", "text": {"content": message}}))
                    .await?;
            }
            "im" => {
                let url = self
                    .channels
                    .im_webhook
                    .as_deref()
                    .ok_or("未配置 IM webhook（[tools.notification].im_webhook）")?;
                self.post(url, json!({"text": message, "recipients": recipients}))
                    .await?;
            }
            "webhook" | "email" => {
                let url = self
                    .channels
                    .webhook
                    .as_deref()
                    .ok_or("未配置通用 webhook（[tools.notification].webhook）")?;
                self.post(
                    url,
                    json!({
                        "channel": channel,
                        "subject": subject,
                        "message": message,
                        "recipients": recipients,
                    }),
                )
                .await?;
            }
            other => {
                return Err(format!(
                    "不支持的通知渠道: {}，支持: wechat, im, webhook, email",
                    other
                ));
            }
        }

        Ok(json!({
            "channel": channel,
            "delivered": true,
            "recipients_count": recipients.len(),
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
    async fn test_empty_message_rejected() {
        let tool = NotificationTool::new(NotificationSection::default());
        let err = tool
            .execute(&args(json!({"message": "  "})))
            .await
            .unwrap_err();
        assert!(err.contains("不能为空"));
    }

    #[tokio::test]
    async fn test_unknown_channel_lists_supported() {
        let tool = NotificationTool::new(NotificationSection::default());
        let err = tool
            .execute(&args(json!({"message": "hi", "channel": "pigeon"})))
            .await
            .unwrap_err();
        assert!(err.contains("不支持的通知渠道"));
        assert!(err.contains("wechat"));
    }

    #[tokio::test]
    async fn test_missing_webhook_config_reported() {
        let tool = NotificationTool::new(NotificationSection::default());
        let err = tool
            .execute(&args(json!({"message": "hi", "channel": "wechat"})))
            .await
            .unwrap_err();
        assert!(err.contains("未配置"));
    }
}
