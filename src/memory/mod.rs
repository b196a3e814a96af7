//! 记忆层：模型消息、只追加对话记录与 JSON 持久化

pub mod conversation;
pub mod persistence;
pub mod transcript;

pub use conversation::{Message, MessageRole};
pub use persistence::{read_json, write_json_atomic};
pub use transcript::{ToolCall, Transcript, Turn};
