//! Hornet - Rust 网络安全智能体
//!
//! 入口：初始化日志与配置，构建 LLM / 能力注册表 / 确认门 / 知识库 / 审计，
//! 启动菜单式 CLI 驱动会话（创建任务、单步执行、自动执行、查看状态）。

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hornet::audit::JsonlAuditSink;
use hornet::config::{load_config, AppConfig};
use hornet::core::{ConfirmationGate, Orchestrator, StepStatus};
use hornet::knowledge::FileKnowledgeBase;
use hornet::llm::{
    create_deepseek_client, LlmClient, OpenAiClient, RetryConfig, RetryingLlmClient,
    ScriptedLlmClient,
};
use hornet::tools::{
    CapabilityRegistry, NetworkPingTool, NotificationTool, PcapQueryTool, PortScanTool,
    ReportGeneratorTool, ThreatBookIpQueryTool,
};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / 脚本 Mock）
fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(create_deepseek_client(
            Some(&cfg.llm.model),
            cfg.llm.temperature,
        ))
    } else if use_openai {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
            cfg.llm.temperature,
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using scripted mock LLM");
        Arc::new(ScriptedLlmClient::new())
    }
}

/// 构建编排器：注册全部能力，接上重试、知识库与 JSONL 审计
fn build_orchestrator(cfg: &AppConfig) -> anyhow::Result<Orchestrator> {
    let backend = create_llm_from_config(cfg);
    let llm: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
        backend,
        RetryConfig {
            max_retries: cfg.llm.max_retries,
            initial_delay_ms: cfg.llm.retry_initial_delay_ms,
        },
    ));

    let mut registry = CapabilityRegistry::new();
    registry.register(NetworkPingTool)?;
    registry.register(PortScanTool::new(cfg.tools.scan.max_concurrency))?;
    registry.register(ThreatBookIpQueryTool::new(
        cfg.tools.threatbook.api_key.clone(),
    ))?;
    registry.register(PcapQueryTool)?;
    registry.register(NotificationTool::new(cfg.tools.notification.clone()))?;
    registry.register(ReportGeneratorTool::new(
        llm.clone(),
        cfg.tools.report.output_dir.clone(),
    ))?;

    let gate = ConfirmationGate::new(
        cfg.agent.enable_human_in_the_loop,
        cfg.agent.safe_mode,
        cfg.agent.require_confirmation_for.clone(),
    );

    Ok(Orchestrator::new(llm, registry, gate)
        .with_max_iterations(cfg.agent.max_iterations)
        .with_capability_timeout(Duration::from_secs(cfg.tools.tool_timeout_secs))
        .with_knowledge(Arc::new(FileKnowledgeBase::load(&cfg.agent.knowledge_dir)))
        .with_audit(Arc::new(JsonlAuditSink::new(&cfg.agent.logs_dir))))
}

fn read_line(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim().to_string()
}

fn show_menu(orchestrator: &Orchestrator, session_id: Option<&str>) {
    println!("\n🔒 Hornet - 网络安全智能体");
    println!("{}", "=".repeat(50));
    match session_id.and_then(|id| orchestrator.session(id)) {
        Some(s) => println!(
            "状态: {}  迭代: {}/{}  步骤: {}",
            s.status.as_str(),
            s.current_iteration,
            s.max_iterations,
            s.task_steps.len()
        ),
        None => println!("状态: 无活动会话"),
    }
    println!(
        "安全模式: {}  人机协同: {}",
        if orchestrator.gate().safe_mode() { "已启用" } else { "已禁用" },
        if orchestrator.gate().human_in_loop() { "已启用" } else { "已禁用" },
    );
    println!("\n  1. 创建新任务");
    println!("  2. 执行一步");
    println!("  3. 继续执行（自动完成）");
    println!("  4. 查看状态");
    println!("  5. 切换安全模式");
    println!("  6. 查看可用工具");
    println!("  0. 退出");
}

/// 执行一步；会话等待人工输入时先收集答复
async fn run_step(orchestrator: &mut Orchestrator, session_id: &str) -> anyhow::Result<StepStatus> {
    let awaiting_prompt = orchestrator.session(session_id).and_then(|s| {
        if s.human_input_required {
            s.human_input_prompt.clone()
        } else {
            None
        }
    });

    let report = if let Some(prompt) = awaiting_prompt {
        println!("\n⚠️  需要人工输入: {}", prompt);
        let input = read_line("请输入: ");
        orchestrator.step(session_id, Some(&input)).await?
    } else {
        orchestrator.step(session_id, None).await?
    };

    println!("[{:?}] {}", report.status, report.message);
    if let Some(result) = &report.capability_result {
        println!(
            "工具结果: {}",
            serde_json::to_string_pretty(result).unwrap_or_default()
        );
    }
    Ok(report.status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hornet::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let mut orchestrator = build_orchestrator(&cfg).context("Failed to build orchestrator")?;
    let mut session_id: Option<String> = None;

    loop {
        show_menu(&orchestrator, session_id.as_deref());
        match read_line("> ").as_str() {
            "1" => {
                let goal = read_line("请输入任务描述: ");
                if goal.is_empty() {
                    println!("⚠️  任务描述不能为空");
                    continue;
                }
                let id = orchestrator.create_session(&goal);
                println!("✓ 任务已创建，会话 ID: {}", &id[..8]);
                session_id = Some(id);
            }
            "2" => match &session_id {
                Some(id) => {
                    let id = id.clone();
                    run_step(&mut orchestrator, &id).await?;
                }
                None => println!("⚠️  请先创建任务"),
            },
            "3" => match &session_id {
                Some(id) => {
                    let id = id.clone();
                    loop {
                        let status = run_step(&mut orchestrator, &id).await?;
                        match status {
                            StepStatus::Continuing | StepStatus::AwaitingHumanInput => continue,
                            _ => break,
                        }
                    }
                }
                None => println!("⚠️  请先创建任务"),
            },
            "4" => match session_id.as_deref().and_then(|id| orchestrator.session(id)) {
                Some(s) => println!(
                    "{}",
                    serde_json::to_string_pretty(&s.summary()).unwrap_or_default()
                ),
                None => println!("⚠️  无活动会话"),
            },
            "5" => {
                let enabled = !orchestrator.gate().safe_mode();
                orchestrator.set_safe_mode(enabled);
                println!("安全模式: {}", if enabled { "已启用" } else { "已禁用" });
            }
            "6" => {
                for name in orchestrator.registry().names() {
                    let sensitive = orchestrator.registry().is_sensitive(&name);
                    println!("- {}{}", name, if sensitive { "（敏感）" } else { "" });
                }
            }
            "0" => break,
            other => {
                if !other.is_empty() {
                    println!("⚠️  无效选项: {}", other);
                }
            }
        }
    }

    Ok(())
}
