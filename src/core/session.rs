//! 会话状态：一次任务运行的完整可序列化记录
//!
//! SessionState 是纯数据结构，只由编排引擎写入；外部（前端、审计）拿到的是
//! 快照或 SessionSummary 投影。消息与执行日志只追加不修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具参数表：string 键到任意 JSON 值
pub type JsonMap = serde_json::Map<String, Value>;

/// Agent 状态机
///
/// Idle -> Planning -> {Executing -> Reflecting -> Planning | AwaitingHumanInput}
/// -> {Completed | Error | MaxIterationsReached}；后三者为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Planning,
    Executing,
    Reflecting,
    AwaitingHumanInput,
    Completed,
    Error,
    MaxIterationsReached,
}

impl AgentStatus {
    /// 终态：不再发生任何状态迁移与写入
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Error | AgentStatus::MaxIterationsReached
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Planning => "planning",
            AgentStatus::Executing => "executing",
            AgentStatus::Reflecting => "reflecting",
            AgentStatus::AwaitingHumanInput => "awaiting_human_input",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
            AgentStatus::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

/// 消息角色；Observation 为工具执行结果，拼 prompt 时转为 user 角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Observation,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self::new(Role::Observation, content)
    }
}

/// 单轮模型输出的结构化解释：思考、计划、动作与参数
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    pub plan: Vec<String>,
    pub action: String,
    pub action_input: JsonMap,
}

/// 任务完成的保留动作名
pub const FINAL_ANSWER: &str = "final_answer";

/// 任务步骤状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// 任务步骤：计划增长时创建，工具调用结束后由引擎更新，永不删除
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStep {
    /// 1 起始的连续编号；恒等于自身在 task_steps 中的下标 + 1
    pub step_id: u32,
    pub description: String,
    pub status: TaskStepStatus,
    pub capability_name: Option<String>,
    pub capability_args: Option<JsonMap>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Token 使用统计（累计值）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub api_calls: u64,
}

impl TokenUsage {
    pub fn add_usage(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.total_tokens += prompt_tokens + completion_tokens;
        self.api_calls += 1;
    }
}

/// 待确认的工具执行（安全模式 / 敏感关键词触发）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub action: String,
    pub args: JsonMap,
}

/// 执行日志条目（结构化，只追加）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: Value,
}

/// 会话状态模型
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub goal: String,
    pub status: AgentStatus,
    pub messages: Vec<ChatMessage>,
    pub task_steps: Vec<TaskStep>,
    pub execution_log: Vec<LogEntry>,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub human_input_required: bool,
    pub human_input_prompt: Option<String>,
    pub pending_confirmation: Option<PendingConfirmation>,
    pub token_usage: TokenUsage,
    /// 最近一轮解析出的决策快照，每轮覆盖
    pub current_decision: Option<Decision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, goal: impl Into<String>, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            goal: goal.into(),
            status: AgentStatus::Idle,
            messages: Vec::new(),
            task_steps: Vec::new(),
            execution_log: Vec::new(),
            current_iteration: 0,
            max_iterations,
            human_input_required: false,
            human_input_prompt: None,
            pending_confirmation: None,
            token_usage: TokenUsage::default(),
            current_decision: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, msg: ChatMessage) {
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    /// 追加任务步骤，step_id 连续且 1 起始
    pub fn add_task_step(&mut self, description: impl Into<String>) -> u32 {
        let step_id = self.task_steps.len() as u32 + 1;
        self.task_steps.push(TaskStep {
            step_id,
            description: description.into(),
            status: TaskStepStatus::Pending,
            capability_name: None,
            capability_args: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        });
        self.updated_at = Utc::now();
        step_id
    }

    pub fn update_task_step(
        &mut self,
        step_id: u32,
        status: TaskStepStatus,
        capability_name: Option<String>,
        capability_args: Option<JsonMap>,
        result: Option<Value>,
        error: Option<String>,
    ) {
        if let Some(step) = self.task_steps.iter_mut().find(|s| s.step_id == step_id) {
            step.status = status;
            if capability_name.is_some() {
                step.capability_name = capability_name;
            }
            if capability_args.is_some() {
                step.capability_args = capability_args;
            }
            if result.is_some() {
                step.result = result;
            }
            if error.is_some() {
                step.error = error;
            }
            self.updated_at = Utc::now();
        }
    }

    /// 当前活动步骤：最后一个 Pending / Executing 的步骤
    pub fn active_step_id(&self) -> Option<u32> {
        self.task_steps
            .iter()
            .rev()
            .find(|s| matches!(s.status, TaskStepStatus::Pending | TaskStepStatus::Executing))
            .map(|s| s.step_id)
    }

    pub fn add_execution_log(&mut self, action: impl Into<String>, details: Value) {
        self.execution_log.push(LogEntry {
            timestamp: Utc::now(),
            action: action.into(),
            details,
        });
        self.updated_at = Utc::now();
    }

    /// 请求人工输入：置位标志与提示，状态转 AwaitingHumanInput
    pub fn request_human_input(&mut self, prompt: impl Into<String>) {
        self.human_input_required = true;
        self.human_input_prompt = Some(prompt.into());
        self.status = AgentStatus::AwaitingHumanInput;
        self.updated_at = Utc::now();
    }

    pub fn clear_human_input(&mut self) {
        self.human_input_required = false;
        self.human_input_prompt = None;
        self.updated_at = Utc::now();
    }

    pub fn set_pending_confirmation(&mut self, pending: PendingConfirmation) {
        self.pending_confirmation = Some(pending);
        self.updated_at = Utc::now();
    }

    pub fn take_pending_confirmation(&mut self) -> Option<PendingConfirmation> {
        self.updated_at = Utc::now();
        self.pending_confirmation.take()
    }

    /// 设置状态并返回旧状态（供引擎发 StateChange 审计事件）
    pub fn set_status(&mut self, status: AgentStatus) -> AgentStatus {
        let old = self.status;
        self.status = status;
        self.updated_at = Utc::now();
        old
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 会话摘要投影：可序列化、可回读
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            iterations: self.current_iteration,
            max_iterations: self.max_iterations,
            messages_count: self.messages.len(),
            task_steps: self
                .task_steps
                .iter()
                .map(|s| TaskStepBrief {
                    step_id: s.step_id,
                    description: s.description.clone(),
                    status: s.status,
                })
                .collect(),
            token_usage: self.token_usage.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// 任务步骤投影（摘要用）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStepBrief {
    pub step_id: u32,
    pub description: String,
    pub status: TaskStepStatus,
}

/// 会话摘要：前端展示与审计落盘用的轻量投影
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub goal: String,
    pub status: AgentStatus,
    pub iterations: u32,
    pub max_iterations: u32,
    pub messages_count: usize,
    pub task_steps: Vec<TaskStepBrief>,
    pub token_usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
