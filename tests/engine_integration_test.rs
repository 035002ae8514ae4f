//! 编排引擎集成测试
//!
//! 用脚本化 LLM 与计数工具驱动完整的 ReAct 循环：迭代上限、终态幂等、
//! 步骤编号、参数别名修复、确认门挂起与批准、模型重试后的单次逻辑调用。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use hornet::audit::{AuditEvent, AuditSink};
use hornet::core::{
    AgentStatus, ConfirmationGate, JsonMap, Orchestrator, StepStatus, TaskStepStatus,
};
use hornet::llm::{LlmClient, LlmError, RetryConfig, RetryingLlmClient, ScriptedLlmClient};
use hornet::tools::{Capability, CapabilityRegistry, ToolParameter};

/// 记录型审计：测试断言事件序列用
#[derive(Default)]
struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    fn count<F: Fn(&AuditEvent) -> bool>(&self, pred: F) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// 计数 ping 桩工具：要求 target_ip，记录实际执行次数
struct CountingPing {
    executions: Arc<AtomicUsize>,
    sensitive: bool,
}

#[async_trait]
impl Capability for CountingPing {
    fn name(&self) -> &str {
        "network_ping"
    }

    fn description(&self) -> &str {
        "连通性检测（测试桩）"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required("target_ip", "string", "目标 IP")]
    }

    fn sensitive(&self) -> bool {
        self.sensitive
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let target = args.get("target_ip").and_then(Value::as_str).unwrap_or("");
        Ok(json!({"target_ip": target, "is_reachable": true}))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    llm: Arc<ScriptedLlmClient>,
    audit: Arc<RecordingAuditSink>,
    executions: Arc<AtomicUsize>,
}

fn harness(max_iterations: u32, gate: ConfirmationGate, sensitive: bool) -> Harness {
    let llm = Arc::new(ScriptedLlmClient::new());
    let audit = Arc::new(RecordingAuditSink::default());
    let executions = Arc::new(AtomicUsize::new(0));

    let mut registry = CapabilityRegistry::new();
    registry
        .register(CountingPing {
            executions: executions.clone(),
            sensitive,
        })
        .unwrap();

    let retrying: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
        llm.clone(),
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
        },
    ));
    let orchestrator = Orchestrator::new(retrying, registry, gate)
        .with_max_iterations(max_iterations)
        .with_audit(audit.clone());

    Harness {
        orchestrator,
        llm,
        audit,
        executions,
    }
}

fn open_gate() -> ConfirmationGate {
    ConfirmationGate::new(false, false, vec![])
}

const PING_DECISION: &str = r#"{"thought": "检查连通性", "plan": ["检查网络连通性"], "action": "network_ping", "action_input": {"target_ip": "10.0.0.1"}}"#;
const FINAL_DECISION: &str = r#"{"thought": "完成", "plan": ["检查网络连通性"], "action": "final_answer", "action_input": {"answer": "主机可达"}}"#;

#[tokio::test]
async fn test_max_iterations_bound() {
    let mut h = harness(3, open_gate(), false);
    for _ in 0..3 {
        h.llm.push_response(PING_DECISION);
    }
    let id = h.orchestrator.create_session("持续检查 10.0.0.1");

    for _ in 0..3 {
        let report = h.orchestrator.step(&id, None).await.unwrap();
        assert_eq!(report.status, StepStatus::Continuing);
    }
    // 第 N+1 次：到达上限，iteration 不超过 N
    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::MaxIterationsReached);
    assert_eq!(report.summary.iterations, 3);

    // 终态幂等：再次调用仍返回同一状态，且不执行任何工具
    let before = h.executions.load(Ordering::SeqCst);
    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::MaxIterationsReached);
    assert_eq!(report.summary.iterations, 3);
    assert_eq!(h.executions.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_completed_session_is_terminal_noop() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_response(FINAL_DECISION);
    let id = h.orchestrator.create_session("检查 10.0.0.1 的连通性");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::Completed);
    assert_eq!(report.message, "主机可达");

    let calls_before = h.llm.calls();
    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::Completed);
    assert_eq!(h.llm.calls(), calls_before);
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_task_step_ids_sequential_as_plan_grows() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_response(PING_DECISION);
    h.llm.push_response(
        r#"{"thought": "扩展计划", "plan": ["检查网络连通性", "查询威胁情报", "生成报告"], "action": "network_ping", "action_input": {"target_ip": "10.0.0.2"}}"#,
    );
    let id = h.orchestrator.create_session("排查 10.0.0.1");

    h.orchestrator.step(&id, None).await.unwrap();
    h.orchestrator.step(&id, None).await.unwrap();

    let session = h.orchestrator.session(&id).unwrap();
    assert_eq!(session.task_steps.len(), 3);
    for (i, step) in session.task_steps.iter().enumerate() {
        assert_eq!(step.step_id as usize, i + 1);
    }
}

#[tokio::test]
async fn test_alias_repair_executes_exactly_once() {
    let mut h = harness(10, open_gate(), false);
    // 模型把 target_ip 写成了 target
    h.llm.push_response(
        r#"{"thought": "检查连通性", "plan": ["检查网络连通性"], "action": "network_ping", "action_input": {"target": "10.0.0.1"}}"#,
    );
    let id = h.orchestrator.create_session("check connectivity to 10.0.0.1");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::Continuing);
    let result = report.capability_result.unwrap();
    assert!(result.success);
    assert_eq!(result.result["target_ip"], "10.0.0.1");

    // 处理器恰好执行一次（第一次失败发生在参数校验层）
    assert_eq!(h.executions.load(Ordering::SeqCst), 1);
    // 恰好一条 CapabilityResult 事件，且带修复标记
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::CapabilityResult { .. })),
        1
    );
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::RepairApplied { kind, .. } if kind == "parameter_alias")),
        1
    );

    // 活动任务步骤已完成
    let session = h.orchestrator.session(&id).unwrap();
    assert_eq!(session.task_steps[0].status, TaskStepStatus::Completed);
    assert_eq!(
        session.task_steps[0].capability_name.as_deref(),
        Some("network_ping")
    );
}

#[tokio::test]
async fn test_unknown_capability_asks_human_with_names() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_response(
        r#"{"thought": "t", "plan": ["p"], "action": "threat_lookup", "action_input": {"value": "abc"}}"#,
    );
    let id = h.orchestrator.create_session("查询情报");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::AwaitingHumanInput);
    assert!(report.message.contains("network_ping"));
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_safe_mode_confirmation_holds_then_approves() {
    let gate = ConfirmationGate::new(true, true, vec![]);
    let mut h = harness(10, gate, true);
    h.llm.push_response(PING_DECISION);
    let id = h.orchestrator.create_session("扫描 10.0.0.1");

    // 第一步：挂起等待确认，不发出任何 CapabilityResult
    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::AwaitingHumanInput);
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::CapabilityResult { .. })),
        0
    );
    let session = h.orchestrator.session(&id).unwrap();
    assert_eq!(session.status, AgentStatus::AwaitingHumanInput);
    assert!(session.pending_confirmation.is_some());

    // 第二步：批准后直接执行挂起的动作，不再请求模型
    let calls_before = h.llm.calls();
    let report = h.orchestrator.step(&id, Some("yes")).await.unwrap();
    assert_eq!(report.status, StepStatus::Continuing);
    assert_eq!(h.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.llm.calls(), calls_before);
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::CapabilityResult { .. })),
        1
    );
    assert!(h
        .orchestrator
        .session(&id)
        .unwrap()
        .pending_confirmation
        .is_none());
}

#[tokio::test]
async fn test_denied_confirmation_replans() {
    let gate = ConfirmationGate::new(true, true, vec![]);
    let mut h = harness(10, gate, true);
    h.llm.push_response(PING_DECISION);
    h.llm.push_response(FINAL_DECISION);
    let id = h.orchestrator.create_session("扫描 10.0.0.1");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::AwaitingHumanInput);

    // 拒绝：挂起动作被丢弃，回到规划并走向完成
    let report = h.orchestrator.step(&id, Some("不要执行")).await.unwrap();
    assert_eq!(report.status, StepStatus::Completed);
    assert_eq!(h.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sensitive_bypass_audited_when_loop_disabled() {
    let gate = ConfirmationGate::new(false, true, vec![]);
    let mut h = harness(10, gate, true);
    h.llm.push_response(PING_DECISION);
    let id = h.orchestrator.create_session("扫描 10.0.0.1");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::Continuing);
    assert_eq!(h.executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::ConfirmationBypassed { .. })),
        1
    );
}

#[tokio::test]
async fn test_retry_records_single_logical_model_call() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_error(LlmError::Timeout);
    h.llm.push_error(LlmError::Connection("reset".into()));
    h.llm.push_response(FINAL_DECISION);
    let id = h.orchestrator.create_session("检查 10.0.0.1");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::Completed);
    // 底层重试了 3 次，但逻辑上只有一对 ModelRequest / ModelResponse
    assert_eq!(h.llm.calls(), 3);
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::ModelRequest { .. })),
        1
    );
    assert_eq!(
        h.audit
            .count(|e| matches!(e, AuditEvent::ModelResponse { .. })),
        1
    );
}

#[tokio::test]
async fn test_unparseable_output_routes_to_human() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_response("抱歉，我无法以 JSON 形式回答这个问题。");
    let id = h.orchestrator.create_session("检查 10.0.0.1");

    let report = h.orchestrator.step(&id, None).await.unwrap();
    assert_eq!(report.status, StepStatus::AwaitingHumanInput);
    assert!(report.message.contains("无法解析"));
    let session = h.orchestrator.session(&id).unwrap();
    assert!(session.human_input_required);
    // 原始响应完整保留在会话消息里
    assert!(session
        .messages
        .iter()
        .any(|m| m.content.contains("无法以 JSON")));
}

#[tokio::test]
async fn test_fenced_decision_equivalent_to_bare() {
    for wrapped in [false, true] {
        let mut h = harness(10, open_gate(), false);
        let text = if wrapped {
            format!("```json\n{}\n```", PING_DECISION)
        } else {
            PING_DECISION.to_string()
        };
        h.llm.push_response(text);
        let id = h.orchestrator.create_session("检查 10.0.0.1");
        let report = h.orchestrator.step(&id, None).await.unwrap();
        assert_eq!(report.status, StepStatus::Continuing, "wrapped={}", wrapped);
        let session = h.orchestrator.session(&id).unwrap();
        let decision = session.current_decision.as_ref().unwrap();
        assert_eq!(decision.action, "network_ping");
        assert_eq!(decision.action_input["target_ip"], "10.0.0.1");
    }
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let mut h = harness(10, open_gate(), false);
    let err = h.orchestrator.step("no-such-session", None).await.unwrap_err();
    assert!(err.to_string().contains("不存在"));
}

#[tokio::test]
async fn test_summary_round_trip_after_steps() {
    let mut h = harness(10, open_gate(), false);
    h.llm.push_response(PING_DECISION);
    h.llm.push_response(FINAL_DECISION);
    let id = h.orchestrator.create_session("检查 10.0.0.1");
    h.orchestrator.step(&id, None).await.unwrap();
    h.orchestrator.step(&id, None).await.unwrap();

    let summary = h.orchestrator.session(&id).unwrap().summary();
    let json = serde_json::to_string(&summary).unwrap();
    let back: hornet::core::SessionSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back.iterations, summary.iterations);
    assert_eq!(back.token_usage, summary.token_usage);
    assert_eq!(back.task_steps.len(), summary.task_steps.len());
    for (a, b) in back.task_steps.iter().zip(summary.task_steps.iter()) {
        assert_eq!(a.status, b.status);
    }
}
