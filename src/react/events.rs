//! Agent 运行过程事件：供 CLI 或上层界面展示进度

use serde::Serialize;

use crate::react::RoleKind;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 第几轮（从 1 开始）
    Iteration {
        role: RoleKind,
        iteration: usize,
        max_iterations: usize,
    },
    /// 模型回复中去掉调用块后的文字
    AssistantText { role: RoleKind, text: String },
    ToolCall {
        role: RoleKind,
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        role: RoleKind,
        tool: String,
        is_error: bool,
    },
    Completed { role: RoleKind, text: String },
}
