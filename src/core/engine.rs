//! ReAct 编排引擎：会话状态机与主控循环
//!
//! Plan -> Act (Capability) -> Observe -> Reflect -> 下一轮 Plan；支持人工确认门、
//! 解析失败与工具失败的有界自动修复、最大迭代限制。引擎是 SessionState 的唯一
//! 写入者：模型客户端、能力注册表、确认门、知识库与审计接收端都在构造时显式传入，
//! 没有进程级单例。解析与工具类失败一律吸收为 AwaitingHumanInput；只有意外错误
//! 才把单个会话置为 Error 终态，step 本身从不 panic。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::core::confirm::{ConfirmationGate, ConfirmationReason, ConfirmationReply};
use crate::core::error::AgentError;
use crate::core::interpreter;
use crate::core::repair;
use crate::core::session::{
    AgentStatus, ChatMessage, JsonMap, PendingConfirmation, Role, SessionState, SessionSummary,
    TaskStepStatus, FINAL_ANSWER,
};
use crate::knowledge::KnowledgeProvider;
use crate::llm::LlmClient;
use crate::tools::{CapabilityOutcome, CapabilityRegistry};

/// 工具参数预览最大字符数（审计用）
const ARGS_PREVIEW_CHARS: usize = 200;

/// 单步执行的对外状态（公共 API 的五种返回值）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Continuing,
    Completed,
    Error,
    AwaitingHumanInput,
    MaxIterationsReached,
}

/// 单步执行报告：状态、给前端的消息、可选的工具结果与会话摘要快照
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub status: StepStatus,
    pub message: String,
    pub capability_result: Option<CapabilityOutcome>,
    pub summary: SessionSummary,
}

/// ReAct 编排引擎
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    registry: CapabilityRegistry,
    gate: ConfirmationGate,
    knowledge: Option<Arc<dyn KnowledgeProvider>>,
    audit: Arc<dyn AuditSink>,
    max_iterations: u32,
    capability_timeout: Duration,
    sessions: HashMap<String, SessionState>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: CapabilityRegistry, gate: ConfirmationGate) -> Self {
        Self {
            llm,
            registry,
            gate,
            knowledge: None,
            audit: Arc::new(TracingAuditSink),
            max_iterations: 20,
            capability_timeout: Duration::from_secs(30),
            sessions: HashMap::new(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeProvider>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_capability_timeout(mut self, timeout: Duration) -> Self {
        self.capability_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    /// 运行时切换安全模式（CLI 菜单用）
    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.gate.set_safe_mode(enabled);
    }

    /// 会话只读快照
    pub fn session(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    /// 创建新会话：system 消息（可选知识库指导 + 能力目录 + 输出契约）+ 用户目标
    pub fn create_session(&mut self, goal: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut session = SessionState::new(&session_id, goal, self.max_iterations);

        let guidance = self
            .knowledge
            .as_ref()
            .and_then(|k| k.lookup_guidance(goal));
        let system_prompt = self.build_system_prompt(guidance.as_deref());
        session.add_message(ChatMessage::system(system_prompt));
        session.add_message(ChatMessage::user(goal));

        self.audit.record(&AuditEvent::SessionStart {
            session_id: session_id.clone(),
            goal: goal.to_string(),
            max_iterations: self.max_iterations,
        });

        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    /// 推进会话恰好一个迭代；终态会话为幂等 no-op。
    /// 只有会话寻址失败返回 Err；其余失败都折叠进 StepReport。
    pub async fn step(
        &mut self,
        session_id: &str,
        human_input: Option<&str>,
    ) -> Result<StepReport, AgentError> {
        let mut session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;

        if session.is_terminal() {
            let report = StepReport {
                status: terminal_step_status(session.status),
                message: "会话已结束".to_string(),
                capability_result: None,
                summary: session.summary(),
            };
            self.sessions.insert(session.session_id.clone(), session);
            return Ok(report);
        }

        let report = match self.step_inner(&mut session, human_input).await {
            Ok(report) => report,
            Err(e) => {
                // 意外错误：该会话进入 Error 终态，诊断信息留在会话记录里
                let error_msg = format!("Agent 执行出错: {}", e);
                let old = session.set_status(AgentStatus::Error);
                self.audit_state_change(&session, old);
                session.add_message(ChatMessage::system(error_msg.clone()));
                self.audit.record(&AuditEvent::Error {
                    session_id: session.session_id.clone(),
                    error_type: "unexpected".to_string(),
                    message: e.to_string(),
                });
                self.audit.record(&AuditEvent::SessionComplete {
                    session_id: session.session_id.clone(),
                    summary: session.summary(),
                });
                StepReport {
                    status: StepStatus::Error,
                    message: error_msg,
                    capability_result: None,
                    summary: session.summary(),
                }
            }
        };

        self.sessions.insert(session.session_id.clone(), session);
        Ok(report)
    }

    async fn step_inner(
        &self,
        session: &mut SessionState,
        human_input: Option<&str>,
    ) -> Result<StepReport, AgentError> {
        // 1. 人工输入：写入会话；若有待确认执行则按确认门语义处理
        let mut approved: Option<PendingConfirmation> = None;
        if let Some(input) = human_input {
            session.add_message(ChatMessage::user(input));
            session.clear_human_input();
            self.audit.record(&AuditEvent::HumanInputReceived {
                session_id: session.session_id.clone(),
                chars: input.chars().count(),
            });
            if session.pending_confirmation.is_some() {
                match self.gate.interpret_reply(input) {
                    ConfirmationReply::Approved => {
                        approved = session.take_pending_confirmation();
                    }
                    ConfirmationReply::Denied => {
                        if let Some(pending) = session.take_pending_confirmation() {
                            session.add_message(ChatMessage::observation(format!(
                                "用户拒绝执行 {}，请调整计划或结束任务",
                                pending.action
                            )));
                            session.add_execution_log(
                                "confirmation_denied",
                                json!({ "action": pending.action }),
                            );
                        }
                    }
                }
            }
        }

        // 2. 迭代上限
        if session.current_iteration >= session.max_iterations {
            let old = session.set_status(AgentStatus::MaxIterationsReached);
            self.audit_state_change(session, old);
            session.add_message(ChatMessage::system("已达到最大迭代次数"));
            self.audit.record(&AuditEvent::SessionComplete {
                session_id: session.session_id.clone(),
                summary: session.summary(),
            });
            return Ok(StepReport {
                status: StepStatus::MaxIterationsReached,
                message: "已达到最大迭代次数".to_string(),
                capability_result: None,
                summary: session.summary(),
            });
        }

        // 3. 本迭代开始
        session.current_iteration += 1;
        let old = session.set_status(AgentStatus::Planning);
        self.audit_state_change(session, old);
        self.audit.record(&AuditEvent::IterationStart {
            session_id: session.session_id.clone(),
            iteration: session.current_iteration,
            max_iterations: session.max_iterations,
        });

        // 已批准的待确认动作：模型已经决策过，直接执行，不再请求模型
        if let Some(pending) = approved {
            session.add_execution_log(
                "confirmation_approved",
                json!({ "action": pending.action }),
            );
            return self.run_capability(session, pending.action, pending.args).await;
        }

        // 4. 拼 prompt 上下文：首条 system + 非 system 消息（observation 转 user）+ 尾部提醒
        let context = build_context(session, &self.reminder_message());

        // 5. 调模型（重试在客户端包装层完成，对这里是一次逻辑调用）
        self.audit.record(&AuditEvent::ModelRequest {
            session_id: session.session_id.clone(),
            messages_count: context.len(),
        });
        let (text, counts) = self.llm.chat_completion(&context).await?;
        session
            .token_usage
            .add_usage(counts.prompt_tokens, counts.completion_tokens);
        self.audit.record(&AuditEvent::ModelResponse {
            session_id: session.session_id.clone(),
            response_chars: text.chars().count(),
            prompt_tokens: counts.prompt_tokens,
            completion_tokens: counts.completion_tokens,
        });
        session.add_message(ChatMessage::assistant(text.clone()));
        session.add_execution_log(
            "llm_call",
            json!({
                "iteration": session.current_iteration,
                "prompt_tokens": counts.prompt_tokens,
                "completion_tokens": counts.completion_tokens,
            }),
        );

        // 6. 解析：四策略 + 浅层修复；都失败则交给人工
        let decision = match interpreter::parse(&text) {
            Ok(d) => d,
            Err(AgentError::ParseError { preview }) => match interpreter::repair(&text) {
                Some(d) => d,
                None => {
                    let prompt = format!(
                        "Agent 输出格式错误，无法解析。原始响应预览: {}。请提供指导或修正。",
                        preview
                    );
                    self.audit.record(&AuditEvent::Error {
                        session_id: session.session_id.clone(),
                        error_type: "parse_error".to_string(),
                        message: preview,
                    });
                    self.ask_human(session, &prompt);
                    return Ok(StepReport {
                        status: StepStatus::AwaitingHumanInput,
                        message: prompt,
                        capability_result: None,
                        summary: session.summary(),
                    });
                }
            },
            Err(e) => return Err(e),
        };

        // 7. 决策快照；计划增长时追加 pending 步骤
        session.current_decision = Some(decision.clone());
        session.add_execution_log(
            "think",
            json!({
                "thought": decision.thought,
                "plan": decision.plan,
                "action": decision.action,
            }),
        );
        if decision.plan.len() > session.task_steps.len() {
            let existing = session.task_steps.len();
            for desc in decision.plan.iter().skip(existing) {
                session.add_task_step(desc.clone());
            }
        }

        // 8. 终止标记：任务完成
        if decision.action == FINAL_ANSWER {
            let answer = decision
                .action_input
                .get("answer")
                .and_then(Value::as_str)
                .unwrap_or("任务完成")
                .to_string();
            let old = session.set_status(AgentStatus::Completed);
            self.audit_state_change(session, old);
            session.add_message(ChatMessage::assistant(answer.clone()));
            self.audit.record(&AuditEvent::SessionComplete {
                session_id: session.session_id.clone(),
                summary: session.summary(),
            });
            return Ok(StepReport {
                status: StepStatus::Completed,
                message: answer,
                capability_result: None,
                summary: session.summary(),
            });
        }

        // 9. 确认门：需确认则挂起，不执行任何东西
        let sensitive = self.registry.is_sensitive(&decision.action);
        if let Some(reason) =
            self.gate
                .requires_confirmation(&decision.action, &decision.action_input, sensitive)
        {
            let args_json =
                serde_json::to_string(&Value::Object(decision.action_input.clone()))
                    .unwrap_or_default();
            let prompt = match reason {
                ConfirmationReason::SensitiveKeyword(kw) => format!(
                    "即将执行操作: {}，参数: {}（命中敏感关键词 \"{}\"）。是否继续？",
                    decision.action, args_json, kw
                ),
                ConfirmationReason::SafeMode => format!(
                    "安全模式已启用。工具: {}，参数: {}。此操作涉及网络扫描或对外投递，需要您的确认。",
                    decision.action, args_json
                ),
            };
            session.set_pending_confirmation(PendingConfirmation {
                id: Uuid::new_v4().to_string(),
                action: decision.action.clone(),
                args: decision.action_input.clone(),
            });
            self.audit.record(&AuditEvent::ConfirmationRequested {
                session_id: session.session_id.clone(),
                capability: decision.action.clone(),
            });
            self.ask_human(session, &prompt);
            return Ok(StepReport {
                status: StepStatus::AwaitingHumanInput,
                message: prompt,
                capability_result: None,
                summary: session.summary(),
            });
        }
        if self.gate.bypassed(sensitive) {
            self.audit.record(&AuditEvent::ConfirmationBypassed {
                session_id: session.session_id.clone(),
                capability: decision.action.clone(),
            });
            session.add_execution_log(
                "safe_mode_skipped",
                json!({ "action": decision.action, "reason": "人机协同已关闭，自动执行" }),
            );
        }

        // 10-12. 执行（含有界修复）
        self.run_capability(session, decision.action, decision.action_input)
            .await
    }

    /// 执行能力：计时、一次有界修复、写回 observation 与步骤状态。
    /// 每次逻辑执行恰好发出一条 CapabilityResult 审计事件（修复重试计入 attempts）。
    async fn run_capability(
        &self,
        session: &mut SessionState,
        action: String,
        args: JsonMap,
    ) -> Result<StepReport, AgentError> {
        let mut action = action;
        let mut args = args;

        let old = session.set_status(AgentStatus::Executing);
        self.audit_state_change(session, old);
        if let Some(id) = session.active_step_id() {
            session.update_task_step(
                id,
                TaskStepStatus::Executing,
                Some(action.clone()),
                Some(args.clone()),
                None,
                None,
            );
        }
        self.audit.record(&AuditEvent::CapabilityStart {
            session_id: session.session_id.clone(),
            capability: action.clone(),
            args_preview: args_preview(&args),
        });

        let started = Instant::now();
        let mut attempts = 1u32;
        let mut outcome = self.dispatch(&action, &args).await;

        // 11. 失败时恰好一次有界修复：参数别名重命名，或最近工具推断
        if !outcome.success {
            let error_msg = outcome.error.clone().unwrap_or_else(|| "未知错误".into());
            if let Some(param) = repair::missing_parameter(&error_msg) {
                if let Some(fixed) = repair::rename_argument(&param, &args) {
                    self.audit.record(&AuditEvent::RepairApplied {
                        session_id: session.session_id.clone(),
                        kind: "parameter_alias".to_string(),
                        detail: format!("{}: {} -> {}", action, args_preview(&args), args_preview(&fixed)),
                    });
                    session.add_execution_log(
                        "auto_fix_params",
                        json!({
                            "action": action,
                            "required_param": param,
                            "corrected_input": Value::Object(fixed.clone()),
                        }),
                    );
                    args = fixed;
                    if let Some(d) = session.current_decision.as_mut() {
                        d.action_input = args.clone();
                    }
                    attempts += 1;
                    outcome = self.dispatch(&action, &args).await;
                }
            } else if is_not_found(&error_msg) {
                if let Some((new_action, new_args)) =
                    repair::infer_capability(&action, &args, &self.registry.names())
                {
                    self.audit.record(&AuditEvent::RepairApplied {
                        session_id: session.session_id.clone(),
                        kind: "capability_inference".to_string(),
                        detail: format!("{} -> {}", action, new_action),
                    });
                    session.add_execution_log(
                        "auto_fix_action",
                        json!({
                            "original_action": action,
                            "corrected_action": new_action,
                            "corrected_input": Value::Object(new_args.clone()),
                        }),
                    );
                    action = new_action;
                    args = new_args;
                    if let Some(d) = session.current_decision.as_mut() {
                        d.action = action.clone();
                        d.action_input = args.clone();
                    }
                    attempts += 1;
                    outcome = self.dispatch(&action, &args).await;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.audit.record(&AuditEvent::CapabilityResult {
            session_id: session.session_id.clone(),
            capability: action.clone(),
            success: outcome.success,
            duration_ms,
            attempts,
        });

        if !outcome.success {
            let error_msg = outcome.error.clone().unwrap_or_else(|| "未知错误".into());
            if let Some(id) = session.active_step_id() {
                session.update_task_step(
                    id,
                    TaskStepStatus::Failed,
                    Some(action.clone()),
                    Some(args.clone()),
                    None,
                    Some(error_msg.clone()),
                );
            }
            let names = self.registry.names().join(", ");
            let prompt = if is_not_found(&error_msg) {
                format!(
                    "工具 '{}' 不存在。可用工具: {}。请使用正确的工具名称。",
                    action, names
                )
            } else if attempts > 1 {
                format!(
                    "工具执行失败（已尝试自动修复）: {}。可用工具: {}。请提供指导或修正。",
                    error_msg, names
                )
            } else {
                format!(
                    "工具执行失败: {}。可用工具: {}。请提供指导或修正。",
                    error_msg, names
                )
            };
            self.audit.record(&AuditEvent::Error {
                session_id: session.session_id.clone(),
                error_type: "capability_error".to_string(),
                message: error_msg,
            });
            self.ask_human(session, &prompt);
            return Ok(StepReport {
                status: StepStatus::AwaitingHumanInput,
                message: prompt,
                capability_result: None,
                summary: session.summary(),
            });
        }

        // 12. 成功：observation 写回会话，活动步骤置 completed，进入 Reflecting
        let result_str = serde_json::to_string_pretty(&outcome).unwrap_or_default();
        session.add_message(ChatMessage::observation(format!(
            "工具 {} 执行结果:\n{}",
            action, result_str
        )));
        session.add_execution_log(
            "tool_execution",
            json!({
                "tool": action,
                "args": Value::Object(args.clone()),
                "success": true,
                "duration_ms": duration_ms,
            }),
        );
        if let Some(id) = session.active_step_id() {
            session.update_task_step(
                id,
                TaskStepStatus::Completed,
                Some(action.clone()),
                Some(args.clone()),
                Some(outcome.result.clone()),
                None,
            );
        }
        let old = session.set_status(AgentStatus::Reflecting);
        self.audit_state_change(session, old);

        let message = if attempts > 1 {
            format!("已执行 {}（已自动修复），继续下一步", action)
        } else {
            format!("已执行 {}，继续下一步", action)
        };
        Ok(StepReport {
            status: StepStatus::Continuing,
            message,
            capability_result: Some(outcome),
            summary: session.summary(),
        })
    }

    /// 带超时的单次分发；所有错误归一化为失败的 CapabilityOutcome
    async fn dispatch(&self, action: &str, args: &JsonMap) -> CapabilityOutcome {
        match tokio::time::timeout(self.capability_timeout, self.registry.execute(action, args))
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(AgentError::CapabilityNotFound(name))) => {
                CapabilityOutcome::failure(format!("工具 {} 不存在", name))
            }
            Ok(Err(e)) => CapabilityOutcome::failure(e.to_string()),
            Err(_) => CapabilityOutcome::failure(format!("工具 {} 执行超时", action)),
        }
    }

    fn ask_human(&self, session: &mut SessionState, prompt: &str) {
        let old = session.status;
        session.request_human_input(prompt);
        self.audit_state_change(session, old);
    }

    fn audit_state_change(&self, session: &SessionState, old: AgentStatus) {
        if old != session.status {
            self.audit.record(&AuditEvent::StateChange {
                session_id: session.session_id.clone(),
                old_status: old.as_str().to_string(),
                new_status: session.status.as_str().to_string(),
            });
        }
    }

    /// 初始 system prompt：知识库指导 + 能力目录 + 安全规则 + 输出契约
    fn build_system_prompt(&self, guidance: Option<&str>) -> String {
        let names: Vec<String> = self
            .registry
            .names()
            .iter()
            .map(|n| format!("\"{}\"", n))
            .collect();
        let names_list = names.join(", ");

        let knowledge_section = match guidance {
            Some(content) => format!(
                "## 知识库指导\n\n以下是从知识库中找到的相关指导，请严格遵循这些步骤：\n\n{}\n\n---\n\n",
                content
            ),
            None => String::new(),
        };

        let keywords = self.gate.sensitive_keywords();
        let confirmation_list = if keywords.is_empty() {
            "- 无".to_string()
        } else {
            keywords
                .iter()
                .map(|k| format!("- {}", k))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"你是一个专业的网络安全智能体，负责帮助用户执行安全任务。

{knowledge_section}## 你的能力

你只能使用以下列出的工具，不能使用任何其他工具或系统命令。

可用工具列表（仅限这些）：{names_list}

{catalogue}
工具使用规则：
1. 只能使用上述列出的工具；任务需要系统命令（ping、nmap 等）时，使用对应工具（network_ping、port_scan）。
2. 禁止使用 command、execute、run、system、shell 等不存在的工具名。

## 工作流程（ReAct 循环）
1. 思考（Think）：分析用户目标
2. 规划（Plan）：拆解为可执行步骤
3. 行动（Act）：选择工具执行当前步骤
4. 观察（Observe）：分析工具结果
5. 反思（Reflect）：判断是否完成

## 安全规则
执行涉及以下关键词的操作前需要人工确认：
{confirmation_list}

## 输出格式要求（严格遵循）

你必须只输出一个有效的 JSON 对象，不要添加任何其他文本、Markdown、代码块或解释：

{{"thought": "思考过程", "plan": ["步骤1", "步骤2"], "action": "工具名称 或 'final_answer'", "action_input": {{"参数名": "参数值"}}}}

- thought (必需): 字符串，当前的分析与下一步打算
- plan (必需): 字符串数组，完整执行计划；单步任务也用数组
- action (必需): 工具名称；任务完成时为 "final_answer"
- action_input (必需): 对象；工具参数名必须完全匹配（例如 target_ip 而不是 ip）；
  final_answer 时为 {{"answer": "最终答案文本"}}

输出 JSON Schema：
{schema}

现在开始工作，只输出一行纯 JSON。"#,
            knowledge_section = knowledge_section,
            names_list = names_list,
            catalogue = self.registry.catalogue_section(),
            confirmation_list = confirmation_list,
            schema = crate::tools::decision_schema_json(),
        )
    }

    /// 每轮末尾的提醒消息：合法工具名与输出契约
    fn reminder_message(&self) -> String {
        let names: Vec<String> = self
            .registry
            .names()
            .iter()
            .map(|n| format!("\"{}\"", n))
            .collect();
        format!(
            "提醒：1. 只输出一个有效 JSON 对象，格式 {{\"thought\": \"...\", \"plan\": [...], \"action\": \"...\", \"action_input\": {{...}}}}；\
             2. action 必须是以下之一：{}，或 \"final_answer\"；\
             3. 不要输出 Markdown、代码块或解释文字。",
            names.join(", ")
        )
    }
}

/// 拼 prompt 上下文：仅首条 system 保留，observation 转为 user 的工具结果，尾部追加提醒
fn build_context(session: &SessionState, reminder: &str) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(session.messages.len() + 1);
    for msg in &session.messages {
        match msg.role {
            Role::System => {
                if out.is_empty() {
                    out.push(msg.clone());
                }
            }
            Role::Observation => {
                out.push(ChatMessage::user(format!("[工具执行结果] {}", msg.content)));
            }
            _ => out.push(msg.clone()),
        }
    }
    out.push(ChatMessage::system(reminder));
    out
}

fn terminal_step_status(status: AgentStatus) -> StepStatus {
    match status {
        AgentStatus::Completed => StepStatus::Completed,
        AgentStatus::MaxIterationsReached => StepStatus::MaxIterationsReached,
        _ => StepStatus::Error,
    }
}

fn is_not_found(error: &str) -> bool {
    error.contains("不存在") || error.to_lowercase().contains("not found")
}

fn args_preview(args: &JsonMap) -> String {
    let s = serde_json::to_string(&Value::Object(args.clone())).unwrap_or_default();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_context_relabels_observations() {
        let mut s = SessionState::new("s", "goal", 5);
        s.add_message(ChatMessage::system("sys"));
        s.add_message(ChatMessage::user("goal"));
        s.add_message(ChatMessage::assistant("{...}"));
        s.add_message(ChatMessage::observation("ping ok"));
        s.add_message(ChatMessage::system("诊断信息"));

        let ctx = build_context(&s, "reminder");
        assert_eq!(ctx.len(), 5); // sys + user + assistant + observation->user + reminder
        assert!(matches!(ctx[0].role, Role::System));
        assert!(matches!(ctx[3].role, Role::User));
        assert!(ctx[3].content.starts_with("[工具执行结果]"));
        assert!(matches!(ctx[4].role, Role::System));
        // 后续 system 消息不进入上下文
        assert!(!ctx.iter().any(|m| m.content == "诊断信息"));
    }

    #[test]
    fn test_terminal_status_mapping() {
        assert_eq!(
            terminal_step_status(AgentStatus::Completed),
            StepStatus::Completed
        );
        assert_eq!(
            terminal_step_status(AgentStatus::MaxIterationsReached),
            StepStatus::MaxIterationsReached
        );
        assert_eq!(terminal_step_status(AgentStatus::Error), StepStatus::Error);
    }
}
