//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / 脚本 Mock）实现 LlmClient：
//! chat_completion 返回响应文本与本次调用的 token 用量。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::session::ChatMessage;

/// 单次调用的 token 用量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// LLM 调用错误；is_retryable 区分瞬态错误与终态错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("请求超时")]
    Timeout,

    #[error("连接失败: {0}")]
    Connection(String),

    #[error("触发限流")]
    RateLimited,

    #[error("服务端错误 ({status})")]
    Server { status: u16 },

    /// 4xx 类客户端错误（限流除外），不重试
    #[error("API 错误: {0}")]
    Api(String),

    #[error("响应无效: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 瞬态错误：超时、连接失败、限流、5xx；可按指数退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::Connection(_) | LlmError::RateLimited | LlmError::Server { .. }
        )
    }
}

/// LLM 客户端 trait：阻塞式单轮 chat completion
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, TokenCounts), LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Connection("refused".into()).is_retryable());
        assert!(LlmError::RateLimited.is_retryable());
        assert!(LlmError::Server { status: 502 }.is_retryable());
        assert!(!LlmError::Api("invalid model".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("empty choices".into()).is_retryable());
    }
}
