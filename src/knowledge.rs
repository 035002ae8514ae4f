//! 知识库：任务相关指导的检索与注入
//!
//! knowledge_base/*.txt 中每个文件描述一种场景（场景 / 适用任务 / 任务规划步骤），
//! 按关键词重叠打分，命中阈值时把整条内容注入初始 system prompt。
//! 命中的规划步骤要求模型严格遵循，减少开放式规划的偏差。

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// 指导查询接口：create_session 时调用一次
pub trait KnowledgeProvider: Send + Sync {
    fn lookup_guidance(&self, goal: &str) -> Option<String>;
}

/// 知识库条目
#[derive(Debug, Clone)]
struct KnowledgeEntry {
    file: String,
    content: String,
    scenario: Option<String>,
    applicable_tasks: Vec<String>,
}

/// 文件型知识库：启动时一次性加载目录下全部 *.txt
#[derive(Debug, Default)]
pub struct FileKnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

/// 相关性阈值：低于此分数的条目不注入
const SCORE_THRESHOLD: f64 = 0.3;

impl FileKnowledgeBase {
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut entries = Vec::new();
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            return Self { entries };
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                tracing::warn!("加载知识库文件失败: {}", path.display());
                continue;
            };
            entries.push(KnowledgeEntry {
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                scenario: extract_scenario(&content),
                applicable_tasks: extract_applicable_tasks(&content),
                content,
            });
        }
        tracing::info!("知识库已加载 {} 条", entries.len());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 关键词重叠打分：场景 0.3 + 适用任务 0.5（均摊）+ 内容逐词 0.1
    fn score(&self, entry: &KnowledgeEntry, query: &str) -> f64 {
        let query_lower = query.to_lowercase();
        let keywords: Vec<&str> = query_lower.split_whitespace().collect();
        let mut score = 0.0;

        if let Some(scenario) = &entry.scenario {
            let scenario_lower = scenario.to_lowercase();
            if keywords.iter().any(|k| scenario_lower.contains(k)) {
                score += 0.3;
            }
        }

        if !entry.applicable_tasks.is_empty() {
            let share = 0.5 / entry.applicable_tasks.len() as f64;
            for task in &entry.applicable_tasks {
                let task_lower = task.to_lowercase();
                if keywords.iter().any(|k| task_lower.contains(k))
                    || task_lower
                        .split_whitespace()
                        .any(|w| query_lower.contains(w))
                {
                    score += share;
                }
            }
        }

        let content_lower = entry.content.to_lowercase();
        for k in &keywords {
            if content_lower.contains(k) {
                score += 0.1;
            }
        }

        score
    }
}

impl KnowledgeProvider for FileKnowledgeBase {
    fn lookup_guidance(&self, goal: &str) -> Option<String> {
        let best = self
            .entries
            .iter()
            .map(|e| (self.score(e, goal), e))
            .filter(|(s, _)| *s > SCORE_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))?;
        tracing::info!("命中知识库条目 {} (score {:.2})", best.1.file, best.0);
        Some(best.1.content.clone())
    }
}

fn extract_scenario(content: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)场景[:：]\s*(.+?)(?=\n\n|\n适用任务|$)").expect("scenario regex")
    });
    re.captures(content).map(|c| c[1].trim().to_string())
}

fn extract_applicable_tasks(content: &str) -> Vec<String> {
    static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
    static ITEM_RE: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK_RE
        .get_or_init(|| Regex::new(r"适用任务[:：]\s*\n((?:- .+\n?)+)").expect("tasks regex"));
    let item = ITEM_RE.get_or_init(|| Regex::new(r"- (.+)").expect("item regex"));
    let Some(c) = block.captures(content) else {
        return Vec::new();
    };
    item.captures_iter(&c[1])
        .map(|m| m[1].trim().to_string())
        .collect()
}
