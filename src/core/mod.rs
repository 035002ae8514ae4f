//! 核心编排层：会话状态、输出解析、确认门、自动修复、主控引擎

pub mod confirm;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod repair;
pub mod session;

pub use confirm::{ConfirmationGate, ConfirmationReason, ConfirmationReply};
pub use engine::{Orchestrator, StepReport, StepStatus};
pub use error::AgentError;
pub use session::{
    AgentStatus, ChatMessage, Decision, JsonMap, PendingConfirmation, Role, SessionState,
    SessionSummary, TaskStep, TaskStepStatus, TokenUsage, FINAL_ANSWER,
};
