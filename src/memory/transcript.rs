//! 对话记录（Transcript）：一次 Agent 运行的只追加记忆
//!
//! Turn 为三种带标签变体：用户消息、助手消息（可含若干工具调用）、工具结果。
//! 不变量：每条 ToolResult 紧随其所回答的 AssistantMessage，且顺序与调用顺序一致。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::PipelineError;
use crate::memory::Message;

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// 解析失败的调用块 name 为空
    pub name: String,
    pub arguments: Value,
}

/// 单个回合
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    UserMessage {
        text: String,
    },
    AssistantMessage {
        text: String,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool: String,
        payload: Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// 只追加的回合序列
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 最近一条 AssistantMessage 中尚未得到结果的调用 id（按调用顺序）
    pub fn pending_call_ids(&self) -> Vec<&str> {
        let mut answered = 0usize;
        for turn in self.turns.iter().rev() {
            match turn {
                Turn::ToolResult { .. } => answered += 1,
                Turn::AssistantMessage { tool_calls, .. } => {
                    return tool_calls
                        .iter()
                        .skip(answered)
                        .map(|c| c.id.as_str())
                        .collect();
                }
                Turn::UserMessage { .. } => return Vec::new(),
            }
        }
        Vec::new()
    }

    /// 为下一条 AssistantMessage 的第 index 个调用生成 id（在整个记录内唯一）
    pub fn next_call_id(&self, index: usize) -> String {
        format!("call_{}_{}", self.turns.len(), index)
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Result<(), PipelineError> {
        self.ensure_no_pending("user message")?;
        self.turns.push(Turn::UserMessage { text: text.into() });
        Ok(())
    }

    pub fn push_assistant(
        &mut self,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<(), PipelineError> {
        self.ensure_no_pending("assistant message")?;
        self.turns.push(Turn::AssistantMessage {
            text: text.into(),
            tool_calls,
        });
        Ok(())
    }

    /// 追加工具结果；call_id 必须是下一个待回答的调用
    pub fn push_tool_result(
        &mut self,
        call_id: &str,
        tool: impl Into<String>,
        payload: Value,
        is_error: bool,
    ) -> Result<(), PipelineError> {
        match self.pending_call_ids().first() {
            Some(expected) if *expected == call_id => {}
            Some(expected) => {
                return Err(PipelineError::TranscriptOrder(format!(
                    "result for '{call_id}' while '{expected}' is next"
                )))
            }
            None => {
                return Err(PipelineError::TranscriptOrder(format!(
                    "result for '{call_id}' without a pending call"
                )))
            }
        }
        self.turns.push(Turn::ToolResult {
            call_id: call_id.to_string(),
            tool: tool.into(),
            payload,
            is_error,
        });
        Ok(())
    }

    fn ensure_no_pending(&self, what: &str) -> Result<(), PipelineError> {
        let pending = self.pending_call_ids();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::TranscriptOrder(format!(
                "{what} appended while {} tool call(s) unanswered",
                pending.len()
            )))
        }
    }

    /// 逐回合重放校验（用于从磁盘加载的记录）
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut replay = Transcript::new();
        for turn in &self.turns {
            match turn.clone() {
                Turn::UserMessage { text } => replay.push_user(text)?,
                Turn::AssistantMessage { text, tool_calls } => {
                    replay.push_assistant(text, tool_calls)?
                }
                Turn::ToolResult {
                    call_id,
                    tool,
                    payload,
                    is_error,
                } => replay.push_tool_result(&call_id, tool, payload, is_error)?,
            }
        }
        Ok(())
    }

    /// 渲染为模型消息：system 在前，连续的 ToolResult 合并为一条 user 消息
    pub fn render(&self, system_prompt: &str) -> Vec<Message> {
        let mut out = vec![Message::system(system_prompt)];
        let mut results: Vec<String> = Vec::new();

        fn flush(out: &mut Vec<Message>, results: &mut Vec<String>) {
            if !results.is_empty() {
                out.push(Message::user(results.join("\n\n")));
                results.clear();
            }
        }

        for turn in &self.turns {
            match turn {
                Turn::UserMessage { text } => {
                    flush(&mut out, &mut results);
                    out.push(Message::user(text.clone()));
                }
                Turn::AssistantMessage { text, .. } => {
                    flush(&mut out, &mut results);
                    out.push(Message::assistant(text.clone()));
                }
                Turn::ToolResult {
                    call_id,
                    tool,
                    payload,
                    is_error,
                } => {
                    let body = match payload {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string_pretty(other)
                            .unwrap_or_else(|_| other.to_string()),
                    };
                    let label = if *is_error { " (error)" } else { "" };
                    results.push(format!(
                        "Tool result for \"{tool}\" [{call_id}]{label}:\n{body}"
                    ));
                }
            }
        }
        flush(&mut out, &mut results);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageRole;
    use serde_json::json;

    fn call(t: &Transcript, i: usize, name: &str) -> ToolCall {
        ToolCall {
            id: t.next_call_id(i),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn test_results_must_follow_call_order() {
        let mut t = Transcript::new();
        t.push_user("make slides").unwrap();
        let calls = vec![call(&t, 0, "list_files"), call(&t, 1, "read_file")];
        let (first, second) = (calls[0].id.clone(), calls[1].id.clone());
        t.push_assistant("", calls).unwrap();

        let err = t
            .push_tool_result(&second, "read_file", json!("x"), false)
            .unwrap_err();
        assert!(matches!(err, PipelineError::TranscriptOrder(_)));

        t.push_tool_result(&first, "list_files", json!([]), false).unwrap();
        assert!(t.push_user("too early").is_err());
        t.push_tool_result(&second, "read_file", json!("x"), false).unwrap();
        assert!(t.pending_call_ids().is_empty());
        t.push_user("next").unwrap();
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_result_without_call_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi").unwrap();
        assert!(t.push_tool_result("call_0_0", "x", json!(null), false).is_err());
    }

    #[test]
    fn test_render_groups_consecutive_results() {
        let mut t = Transcript::new();
        t.push_user("go").unwrap();
        let calls = vec![call(&t, 0, "list_files"), call(&t, 1, "read_file")];
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        t.push_assistant("calling", calls).unwrap();
        t.push_tool_result(&ids[0], "list_files", json!({"entries": []}), false)
            .unwrap();
        t.push_tool_result(&ids[1], "read_file", json!("nope"), true)
            .unwrap();

        let msgs = t.render("sys");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, MessageRole::System);
        assert_eq!(msgs[3].role, MessageRole::User);
        assert!(msgs[3].content.contains("Tool result for \"list_files\""));
        assert!(msgs[3].content.contains("(error)"));
    }

    #[test]
    fn test_tampered_record_fails_validation() {
        let raw = json!([
            {"kind": "user_message", "text": "hi"},
            {"kind": "tool_result", "call_id": "call_9_0", "tool": "x", "payload": null}
        ]);
        let t: Transcript = serde_json::from_value(raw).unwrap();
        assert!(t.validate().is_err());
    }
}
