//! 解析模型回复中的工具调用块
//!
//! 调用以 `<<<TOOL_CALL>>>` / `<<<END_TOOL_CALL>>>` 包裹，内容为 `{"tool": ..., "parameters": {...}}`；
//! 块内 JSON 不合法时保留原文，交由循环回报 MalformedToolCall。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::tools::{TOOL_CALL_END, TOOL_CALL_START};

static TOOL_CALL_RE: OnceLock<Regex> = OnceLock::new();

fn tool_call_re() -> &'static Regex {
    TOOL_CALL_RE.get_or_init(|| {
        let pattern = format!(
            r"(?s){}(.*?){}",
            regex::escape(TOOL_CALL_START),
            regex::escape(TOOL_CALL_END)
        );
        Regex::new(&pattern).expect("tool call markers form a valid pattern")
    })
}

/// 单个调用块的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCall {
    Valid { tool: String, parameters: Value },
    Invalid { raw: String, reason: String },
}

/// 按出现顺序提取全部调用块
pub fn parse_tool_calls(reply: &str) -> Vec<ParsedCall> {
    let re = tool_call_re();
    let mut calls: Vec<ParsedCall> = re
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| parse_block(m.as_str()))
        .collect();

    let tail_start = re.find_iter(reply).last().map(|m| m.end()).unwrap_or(0);
    let tail = &reply[tail_start..];
    if let Some(pos) = tail.find(TOOL_CALL_START) {
        calls.push(ParsedCall::Invalid {
            raw: tail[pos..].chars().take(500).collect(),
            reason: format!("missing {TOOL_CALL_END}"),
        });
    }
    calls
}

/// 去掉调用块后的可见文本
pub fn visible_text(reply: &str) -> String {
    tool_call_re().replace_all(reply, "").trim().to_string()
}

fn strip_code_fence(body: &str) -> &str {
    let body = body.trim();
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_block(body: &str) -> ParsedCall {
    let json = strip_code_fence(body);
    let invalid = |reason: String| ParsedCall::Invalid {
        raw: json.chars().take(500).collect(),
        reason,
    };
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return invalid(format!("invalid JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return invalid("tool call must be a JSON object".to_string());
    };
    let Some(tool) = obj.get("tool").and_then(Value::as_str) else {
        return invalid("missing string field 'tool'".to_string());
    };
    let parameters = obj
        .get("parameters")
        .or_else(|| obj.get("args"))
        .cloned()
        .unwrap_or(Value::Null);
    ParsedCall::Valid {
        tool: tool.trim().to_string(),
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_calls_in_order() {
        let reply = "Looking around.\n<<<TOOL_CALL>>>\n{\"tool\": \"list_files\", \"parameters\": {\"recursive\": true}}\n<<<END_TOOL_CALL>>>\nthen\n<<<TOOL_CALL>>>```json\n{\"tool\": \"read_file\", \"parameters\": {\"paths\": [\"a.md\"]}}\n```<<<END_TOOL_CALL>>>";
        let calls = parse_tool_calls(reply);
        assert_eq!(
            calls,
            vec![
                ParsedCall::Valid {
                    tool: "list_files".into(),
                    parameters: json!({"recursive": true})
                },
                ParsedCall::Valid {
                    tool: "read_file".into(),
                    parameters: json!({"paths": ["a.md"]})
                },
            ]
        );
        assert_eq!(visible_text(reply), "Looking around.\n\nthen");
    }

    #[test]
    fn test_no_markers_means_no_calls() {
        assert!(parse_tool_calls("All done, the plan is ready.").is_empty());
    }

    #[test]
    fn test_invalid_blocks_are_kept() {
        let reply = "<<<TOOL_CALL>>>{tool: list_files}<<<END_TOOL_CALL>>>\n<<<TOOL_CALL>>>{\"parameters\": {}}<<<END_TOOL_CALL>>>\n<<<TOOL_CALL>>>{\"tool\": \"read_file\"";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| matches!(c, ParsedCall::Invalid { .. })));
        match &calls[2] {
            ParsedCall::Invalid { reason, .. } => assert!(reason.contains("missing")),
            _ => unreachable!(),
        }
    }
}
