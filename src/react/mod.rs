//! 认知层：角色与角色切换、调用块解析、Agent 主循环

pub mod events;
pub mod loop_;
pub mod parser;
pub mod role;

pub use events::RunEvent;
pub use loop_::{AgentRunner, RunResult, DEFAULT_MAX_ITERATIONS};
pub use parser::{parse_tool_calls, visible_text, ParsedCall};
pub use role::{switch_role, BoundTranscript, ConversationSource, Role, RoleKind};
