//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本 Mock）+ 重试包装

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::ScriptedLlmClient;
pub use openai::{CumulativeUsage, OpenAiClient};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{LlmClient, LlmError, TokenCounts};
