//! 脚本化 Mock LLM 客户端（用于测试，无需 API）
//!
//! 按入队顺序弹出预置响应或错误；脚本耗尽时回显最后一条 user 消息为 final_answer，
//! 便于在无网络环境下跑通整条 ReAct 流程。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::session::{ChatMessage, Role};
use crate::llm::{LlmClient, LlmError, TokenCounts};

/// 脚本条目：成功响应或注入的错误
type ScriptItem = Result<String, LlmError>;

/// 脚本化客户端：push_response / push_error 入队，chat_completion 按序弹出
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<ScriptItem>>,
    calls: AtomicU64,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.script.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, err: LlmError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    /// 实际发生的调用次数（含失败的调用）
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fallback(messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!(
            r#"{{"thought": "echo", "plan": ["回显输入"], "action": "final_answer", "action_input": {{"answer": "Echo: {}"}}}}"#,
            last_user.replace('"', "'").replace('\n', " ")
        )
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, TokenCounts), LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => Self::fallback(messages),
        };
        let counts = TokenCounts {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        Ok((text, counts))
    }
}
