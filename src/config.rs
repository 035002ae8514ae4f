//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HORNET__*` 覆盖（双下划线表示嵌套，如 `HORNET__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [agent] 段：迭代上限与人机协同开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单次会话最大 ReAct 迭代次数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// 是否启用人机协同（敏感操作执行前暂停等待确认）
    #[serde(default)]
    pub enable_human_in_the_loop: bool,
    /// 安全模式：标记为敏感的工具在人机协同开启时需确认
    #[serde(default)]
    pub safe_mode: bool,
    /// 动作或参数命中以下关键词时需人工确认（大小写不敏感）
    #[serde(default = "default_confirmation_keywords")]
    pub require_confirmation_for: Vec<String>,
    /// 知识库目录（*.txt 指导文件）
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,
    /// 审计日志目录（JSONL）
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

fn default_max_iterations() -> u32 {
    20
}

fn default_confirmation_keywords() -> Vec<String> {
    vec![
        "delete".into(),
        "format".into(),
        "shutdown".into(),
        "rm -rf".into(),
    ]
}

fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("knowledge_base")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            enable_human_in_the_loop: false,
            safe_mode: false,
            require_confirmation_for: default_confirmation_keywords(),
            knowledge_dir: default_knowledge_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// [llm] 段：后端选择、重试与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 可重试错误（超时、连接失败、限流、5xx）的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 首次重试延迟（毫秒），之后指数翻倍
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

/// [tools] 段：工具超时、扫描并发、威胁情报与通知配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub threatbook: ThreatBookSection,
    #[serde(default)]
    pub notification: NotificationSection,
    #[serde(default)]
    pub report: ReportSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            scan: ScanSection::default(),
            threatbook: ThreatBookSection::default(),
            notification: NotificationSection::default(),
            report: ReportSection::default(),
        }
    }
}

/// [tools.scan] 段：端口扫描并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    #[serde(default = "default_scan_concurrency")]
    pub max_concurrency: usize,
}

fn default_scan_concurrency() -> usize {
    32
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_scan_concurrency(),
        }
    }
}

/// [tools.threatbook] 段：微步在线 API Key（也可用环境变量 THREATBOOK_API_KEY）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ThreatBookSection {
    pub api_key: Option<String>,
}

/// [tools.notification] 段：各通知渠道的 webhook 地址
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NotificationSection {
    /// 企业微信群机器人 webhook
    pub wechat_webhook: Option<String>,
    /// 第三方 IM webhook
    pub im_webhook: Option<String>,
    /// 通用 webhook（含邮件网关等 HTTP 投递端点）
    pub webhook: Option<String>,
}

/// [tools.report] 段：报告输出目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            llm: LlmSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HORNET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HORNET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HORNET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 20);
        assert!(!cfg.agent.enable_human_in_the_loop);
        assert!(!cfg.agent.safe_mode);
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.max_retries, 3);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
    }
}
