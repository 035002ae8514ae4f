//! 报告生成工具
//!
//! 调用 LLM 把执行过程中的原始数据整理成结构化 Markdown 报告，写入输出目录；
//! 可选生成一个最简 HTML 包装版本。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::session::{ChatMessage, JsonMap};
use crate::llm::LlmClient;
use crate::tools::{Capability, ToolParameter};

/// 报告生成工具：持有 LLM 客户端与输出目录
pub struct ReportGeneratorTool {
    llm: Arc<dyn LlmClient>,
    output_dir: PathBuf,
}

impl ReportGeneratorTool {
    pub fn new(llm: Arc<dyn LlmClient>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Capability for ReportGeneratorTool {
    fn name(&self) -> &str {
        "report_generator"
    }

    fn description(&self) -> &str {
        "将执行过程中的数据和结果整理成结构化报告。传入文本内容（执行日志摘要、关键发现、分析结果等），工具调用 LLM 整理成 Markdown，可选生成 HTML。"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("content", "string", "要整理成报告的原始文本内容"),
            ToolParameter::optional("title", "string", "报告标题（默认自动生成）"),
            ToolParameter::optional(
                "formats",
                "array",
                "输出格式列表：markdown（默认）、html",
            ),
        ]
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or("content 不能为空")?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let title = args
            .get("title")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("执行报告_{}", timestamp));
        let formats: Vec<String> = args
            .get("formats")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_lowercase())
                    .collect()
            })
            .unwrap_or_else(|| vec!["markdown".to_string()]);

        let prompt = format!(
            "请将以下原始执行数据整理成一份结构化的 Markdown 报告。\n\
             报告标题: {}\n\n\
             要求：包含概述、关键发现、详细结果、结论与建议五个部分；\
             只输出 Markdown 内容，不要额外解释。\n\n\
             原始内容:\n{}",
            title, content
        );
        let (markdown, _) = self
            .llm
            .chat_completion(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| format!("LLM 整理报告失败: {}", e))?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| format!("创建报告目录失败: {}", e))?;
        let safe_title: String = title
            .chars()
            .map(|c| if c == ' ' || c == '/' { '_' } else { c })
            .collect();

        let mut files = Vec::new();
        for format in &formats {
            match format.as_str() {
                "markdown" | "md" => {
                    let path = self
                        .output_dir
                        .join(format!("{}_{}.md", safe_title, timestamp));
                    std::fs::write(&path, &markdown)
                        .map_err(|e| format!("写入报告失败: {}", e))?;
                    files.push(path.to_string_lossy().into_owned());
                }
                "html" => {
                    let path = self
                        .output_dir
                        .join(format!("{}_{}.html", safe_title, timestamp));
                    std::fs::write(&path, html_wrapper(&title, &markdown))
                        .map_err(|e| format!("写入报告失败: {}", e))?;
                    files.push(path.to_string_lossy().into_owned());
                }
                other => return Err(format!("不支持的报告格式: {}（支持 markdown, html）", other)),
            }
        }

        Ok(json!({
            "title": title,
            "formats": formats,
            "files": files,
        }))
    }
}

/// 最简 HTML 包装：转义后的 Markdown 正文
fn html_wrapper(title: &str, markdown: &str) -> String {
    let escaped = markdown
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<!DOCTYPE html>\n<html lang=\"zh\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <style>body{{font-family:sans-serif;max-width:860px;margin:2em auto;}}pre{{white-space:pre-wrap;}}</style>\n\
         </head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        title, escaped
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn args(v: serde_json::Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_generates_markdown_and_html() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_response("# 扫描报告\n\n## 概述\n一切正常。");

        let tool = ReportGeneratorTool::new(llm, dir.path());
        let result = tool
            .execute(&args(json!({
                "content": "扫描了 16 个端口，开放 2 个",
                "title": "扫描报告",
                "formats": ["markdown", "html"],
            })))
            .await
            .unwrap();

        let files = result["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        let md = std::fs::read_to_string(files[0].as_str().unwrap()).unwrap();
        assert!(md.contains("扫描报告"));
        let html = std::fs::read_to_string(files[1].as_str().unwrap()).unwrap();
        assert!(html.contains("&lt;") || html.contains("<pre>"));
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let tool = ReportGeneratorTool::new(Arc::new(ScriptedLlmClient::new()), "reports");
        let err = tool.execute(&args(json!({"content": ""}))).await.unwrap_err();
        assert!(err.contains("不能为空"));
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_response("# r");
        let tool = ReportGeneratorTool::new(llm, dir.path());
        let err = tool
            .execute(&args(json!({"content": "x", "formats": ["pdf"]})))
            .await
            .unwrap_err();
        assert!(err.contains("不支持的报告格式"));
    }
}
