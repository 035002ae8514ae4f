//! Hornet - Rust 网络安全智能体
//!
//! 模块划分：
//! - **audit**: 结构化审计事件与落盘（tracing / JSONL）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、输出解析、确认门、自动修复、ReAct 编排引擎
//! - **knowledge**: 知识库检索（任务指导注入 system prompt）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本 Mock）+ 重试包装
//! - **observability**: tracing 初始化
//! - **tools**: 安全能力工具箱（ping、端口扫描、威胁情报、pcap 查询、通知、报告）与注册表

pub mod audit;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod tools;
