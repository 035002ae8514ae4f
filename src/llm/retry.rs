//! LLM 重试包装
//!
//! 包装任意 LlmClient：瞬态错误（超时、连接失败、限流、5xx）按指数退避重试，
//! 终态错误立即返回。对上层而言一次 chat_completion 仍是一次逻辑调用。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::session::ChatMessage;
use crate::llm::{LlmClient, LlmError, TokenCounts};

/// 重试配置：最大重试次数与首次延迟（之后每次翻倍）
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
        }
    }
}

/// 带重试的 LLM 客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, TokenCounts), LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.chat_completion(messages).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.initial_delay_ms.saturating_mul(1u64 << attempt);
                    tracing::warn!(
                        "LLM 调用失败 ({e})，{} ms 后重试 ({}/{})",
                        delay,
                        attempt + 1,
                        self.config.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
