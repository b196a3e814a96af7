//! 角色与角色切换
//!
//! Role = 指令 + 工具目录 + 对话来源（全新 / 继承）。
//! switch_role 是纯函数：返回绑定到新角色的同一份对话记录，不截断、不改写已有回合。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::Transcript;
use crate::tools::{catalogue_prompt, ToolName};

/// 流水线中的三种角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Collector,
    Architect,
    Designer,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Collector => "collector",
            RoleKind::Architect => "architect",
            RoleKind::Designer => "designer",
        }
    }

    pub fn default_catalogue(&self) -> Vec<ToolName> {
        match self {
            RoleKind::Collector => vec![
                ToolName::ListFiles,
                ToolName::ReadFile,
                ToolName::InspectCsvHead,
                ToolName::ExecuteCommand,
                ToolName::WriteFile,
                ToolName::TaskCompleted,
            ],
            RoleKind::Architect => vec![
                ToolName::ListFiles,
                ToolName::ReadFile,
                ToolName::InspectCsvHead,
                ToolName::WriteFile,
                ToolName::TaskCompleted,
            ],
            RoleKind::Designer => vec![
                ToolName::ListFiles,
                ToolName::ReadFile,
                ToolName::WriteFile,
                ToolName::TaskCompleted,
            ],
        }
    }

    /// 设计师不继承任何历史
    pub fn default_source(&self) -> ConversationSource {
        match self {
            RoleKind::Designer => ConversationSource::Fresh,
            _ => ConversationSource::Inherited,
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSource {
    Fresh,
    Inherited,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Role {
    pub kind: RoleKind,
    pub instructions: String,
    pub catalogue: Vec<ToolName>,
    pub source: ConversationSource,
}

impl Role {
    pub fn new(kind: RoleKind, instructions: impl Into<String>) -> Self {
        Self {
            kind,
            instructions: instructions.into(),
            catalogue: kind.default_catalogue(),
            source: kind.default_source(),
        }
    }

    /// 指令 + 工具目录说明
    pub fn system_prompt(&self) -> String {
        format!(
            "{}\n\n{}",
            self.instructions.trim_end(),
            catalogue_prompt(&self.catalogue)
        )
    }
}

/// 绑定了当前角色的对话记录
#[derive(Clone, Debug)]
pub struct BoundTranscript {
    transcript: Transcript,
    role: Arc<Role>,
}

impl BoundTranscript {
    pub fn new(transcript: Transcript, role: Arc<Role>) -> Self {
        Self { transcript, role }
    }

    /// 空记录（设计师运行）
    pub fn fresh(role: Arc<Role>) -> Self {
        Self::new(Transcript::new(), role)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }
}

/// 角色切换：同一份回合序列绑定到新角色，无任何 I/O
pub fn switch_role(bound: &BoundTranscript, role: Arc<Role>) -> BoundTranscript {
    BoundTranscript {
        transcript: bound.transcript.clone(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use serde_json::json;

    #[test]
    fn test_switch_role_preserves_turns() {
        let collector = Arc::new(Role::new(RoleKind::Collector, "gather"));
        let mut bound = BoundTranscript::fresh(collector);
        let t = bound.transcript_mut();
        t.push_user("summarise sales.csv").unwrap();
        let id = t.next_call_id(0);
        t.push_assistant(
            "",
            vec![ToolCall {
                id: id.clone(),
                name: "read_file".into(),
                arguments: json!({"paths": ["sales.csv"]}),
            }],
        )
        .unwrap();
        t.push_tool_result(&id, "read_file", json!("1 | a,b"), false).unwrap();

        for kind in [RoleKind::Architect, RoleKind::Designer, RoleKind::Collector] {
            let switched = switch_role(&bound, Arc::new(Role::new(kind, "next")));
            assert_eq!(switched.transcript().turns(), bound.transcript().turns());
            assert_eq!(switched.role().kind, kind);
        }
        assert_eq!(bound.role().kind, RoleKind::Collector);
    }

    #[test]
    fn test_designer_is_fresh_and_cannot_run_commands() {
        let role = Role::new(RoleKind::Designer, "draw");
        assert_eq!(role.source, ConversationSource::Fresh);
        assert!(!role.catalogue.contains(&ToolName::ExecuteCommand));
        assert!(role.system_prompt().contains("### write_file"));
    }
}
