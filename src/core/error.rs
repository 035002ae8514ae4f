//! Agent 错误类型
//!
//! 解析与工具类错误由引擎吸收为 AwaitingHumanInput，不会终止会话；
//! 只有真正意外的错误才会把单个会话置为 Error 终态，进程本身不受影响。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（解析、工具、模型、配置、会话寻址）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出无法解析；只携带有界预览，完整文本已在会话消息中
    #[error("无法解析模型输出: {preview}")]
    ParseError { preview: String },

    #[error("工具 {0} 不存在")]
    CapabilityNotFound(String),

    #[error("工具 {0} 已注册")]
    DuplicateCapability(String),

    #[error("工具执行失败: {0}")]
    CapabilityInvocationError(String),

    /// 模型调用失败（重试预算耗尽或不可重试错误）
    #[error("LLM 调用失败: {0}")]
    Llm(#[from] LlmError),

    /// 启动期配置缺失（凭据、provider），会话创建前即失败
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("会话 {0} 不存在")]
    UnknownSession(String),
}
