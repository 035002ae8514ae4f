//! 人工确认门
//!
//! 只有人机协同开启时才会要求确认：动作与参数的序列化文本命中敏感关键词，
//! 或（安全模式开启且工具本身标记为敏感）。人机协同关闭时敏感工具直接执行，
//! 由引擎补一条 ConfirmationBypassed 审计事件。

use crate::core::session::JsonMap;

/// 需要确认的原因（决定提示文案与审计内容）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationReason {
    /// 动作或参数命中配置的敏感关键词
    SensitiveKeyword(String),
    /// 安全模式下的敏感工具
    SafeMode,
}

/// 人工答复的判定结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationReply {
    Approved,
    Denied,
}

/// 确认门：持有人机协同 / 安全模式开关与敏感关键词表
#[derive(Clone, Debug)]
pub struct ConfirmationGate {
    human_in_loop: bool,
    safe_mode: bool,
    sensitive_keywords: Vec<String>,
}

impl ConfirmationGate {
    pub fn new(human_in_loop: bool, safe_mode: bool, sensitive_keywords: Vec<String>) -> Self {
        Self {
            human_in_loop,
            safe_mode,
            sensitive_keywords,
        }
    }

    pub fn human_in_loop(&self) -> bool {
        self.human_in_loop
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn set_safe_mode(&mut self, enabled: bool) {
        self.safe_mode = enabled;
    }

    pub fn sensitive_keywords(&self) -> &[String] {
        &self.sensitive_keywords
    }

    /// 判定是否需要人工确认；None 表示直接执行
    pub fn requires_confirmation(
        &self,
        action: &str,
        action_input: &JsonMap,
        capability_is_sensitive: bool,
    ) -> Option<ConfirmationReason> {
        if !self.human_in_loop {
            return None;
        }

        let serialized = format!(
            "{} {}",
            action,
            serde_json::to_string(action_input).unwrap_or_default()
        )
        .to_lowercase();
        for keyword in &self.sensitive_keywords {
            if !keyword.is_empty() && serialized.contains(&keyword.to_lowercase()) {
                return Some(ConfirmationReason::SensitiveKeyword(keyword.clone()));
            }
        }

        if self.safe_mode && capability_is_sensitive {
            return Some(ConfirmationReason::SafeMode);
        }

        None
    }

    /// 人机协同关闭时敏感工具被直接放行（需要审计）
    pub fn bypassed(&self, capability_is_sensitive: bool) -> bool {
        !self.human_in_loop && self.safe_mode && capability_is_sensitive
    }

    /// 判定人工答复是否批准；未命中肯定词一律视为拒绝
    pub fn interpret_reply(&self, reply: &str) -> ConfirmationReply {
        const AFFIRMATIVE: &[&str] = &[
            "yes", "y", "ok", "approve", "approved", "continue", "确认", "继续", "同意", "是",
            "好", "执行",
        ];
        let normalized = reply.trim().to_lowercase();
        if AFFIRMATIVE.iter().any(|a| normalized == *a) {
            ConfirmationReply::Approved
        } else {
            ConfirmationReply::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: serde_json::Value) -> JsonMap {
        pairs.as_object().unwrap().clone()
    }

    #[test]
    fn test_disabled_loop_never_confirms() {
        let gate = ConfirmationGate::new(false, true, vec!["delete".into()]);
        assert_eq!(
            gate.requires_confirmation("delete_everything", &JsonMap::new(), true),
            None
        );
        assert!(gate.bypassed(true));
    }

    #[test]
    fn test_keyword_match_case_insensitive() {
        let gate = ConfirmationGate::new(true, false, vec!["Format".into()]);
        let reason = gate.requires_confirmation(
            "disk_tool",
            &args(json!({"cmd": "FORMAT c:"})),
            false,
        );
        assert_eq!(
            reason,
            Some(ConfirmationReason::SensitiveKeyword("Format".into()))
        );
    }

    #[test]
    fn test_safe_mode_gates_sensitive_capability() {
        let gate = ConfirmationGate::new(true, true, vec![]);
        assert_eq!(
            gate.requires_confirmation("port_scan", &JsonMap::new(), true),
            Some(ConfirmationReason::SafeMode)
        );
        // 安全模式关闭时敏感工具直接执行
        let gate = ConfirmationGate::new(true, false, vec![]);
        assert_eq!(
            gate.requires_confirmation("port_scan", &JsonMap::new(), true),
            None
        );
    }

    #[test]
    fn test_reply_interpretation_defaults_to_deny() {
        let gate = ConfirmationGate::new(true, true, vec![]);
        assert_eq!(gate.interpret_reply("  确认 "), ConfirmationReply::Approved);
        assert_eq!(gate.interpret_reply("YES"), ConfirmationReply::Approved);
        assert_eq!(gate.interpret_reply("不要"), ConfirmationReply::Denied);
        assert_eq!(gate.interpret_reply("maybe later"), ConfirmationReply::Denied);
    }
}
