//! 结构化审计：事件定义与落盘
//!
//! AuditSink 是 fire-and-forget 的：record 不返回错误，任何写入失败都被吞掉，
//! 绝不阻塞或中断 ReAct 循环。事件可序列化为 JSON（tagged enum），
//! JsonlAuditSink 按会话落到 logs/execution_<id8>.jsonl。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::session::SessionSummary;

/// 审计事件（可序列化为 JSON 供离线分析）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStart {
        session_id: String,
        goal: String,
        max_iterations: u32,
    },
    IterationStart {
        session_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    ModelRequest {
        session_id: String,
        messages_count: usize,
    },
    ModelResponse {
        session_id: String,
        response_chars: usize,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    StateChange {
        session_id: String,
        old_status: String,
        new_status: String,
    },
    CapabilityStart {
        session_id: String,
        capability: String,
        args_preview: String,
    },
    /// 每次逻辑执行恰好一条（含修复重试在内记为一次）
    CapabilityResult {
        session_id: String,
        capability: String,
        success: bool,
        duration_ms: u64,
        attempts: u32,
    },
    /// 自动修复（参数别名 / 工具推断），用于后续调优
    RepairApplied {
        session_id: String,
        kind: String,
        detail: String,
    },
    ConfirmationRequested {
        session_id: String,
        capability: String,
    },
    /// 人机协同关闭时敏感工具被直接放行
    ConfirmationBypassed {
        session_id: String,
        capability: String,
    },
    HumanInputReceived {
        session_id: String,
        chars: usize,
    },
    Error {
        session_id: String,
        error_type: String,
        message: String,
    },
    SessionComplete {
        session_id: String,
        summary: SessionSummary,
    },
}

impl AuditEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AuditEvent::SessionStart { session_id, .. }
            | AuditEvent::IterationStart { session_id, .. }
            | AuditEvent::ModelRequest { session_id, .. }
            | AuditEvent::ModelResponse { session_id, .. }
            | AuditEvent::StateChange { session_id, .. }
            | AuditEvent::CapabilityStart { session_id, .. }
            | AuditEvent::CapabilityResult { session_id, .. }
            | AuditEvent::RepairApplied { session_id, .. }
            | AuditEvent::ConfirmationRequested { session_id, .. }
            | AuditEvent::ConfirmationBypassed { session_id, .. }
            | AuditEvent::HumanInputReceived { session_id, .. }
            | AuditEvent::Error { session_id, .. }
            | AuditEvent::SessionComplete { session_id, .. } => session_id,
        }
    }
}

/// 审计接收端：fire-and-forget，实现方必须自行吞掉失败
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// 默认实现：结构化 JSON 走 tracing
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            tracing::info!(audit = %json, "audit");
        }
    }
}

/// JSONL 落盘：每个会话一个 logs/execution_<id8>.jsonl，追加写，错误吞掉
pub struct JsonlAuditSink {
    logs_dir: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let logs_dir = logs_dir.into();
        let _ = std::fs::create_dir_all(&logs_dir);
        Self { logs_dir }
    }

    fn file_for(&self, session_id: &str) -> PathBuf {
        let short: String = session_id.chars().take(8).collect();
        self.logs_dir.join(format!("execution_{}.jsonl", short))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            return;
        };
        let path = self.file_for(event.session_id());
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", json);
        }
    }
}
