//! 工具层：固定工具目录、参数校验、沙箱文件系统、命令执行、CSV 预览与执行网关

pub mod args;
pub mod executor;
pub mod filesystem;
pub mod schema;
pub mod shell;
pub mod tabular;

pub use args::{ToolInvocation, ToolName};
pub use executor::{ToolGateway, ToolOutcome};
pub use filesystem::{IgnoreRules, ReadLimits, SafeFs};
pub use schema::{catalogue_prompt, parameters_schema, TOOL_CALL_END, TOOL_CALL_START};
pub use shell::ShellRunner;
