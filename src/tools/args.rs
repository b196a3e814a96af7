//! 工具目录与强类型参数
//!
//! 模型给出的 `{"tool": ..., "parameters": {...}}` 在派发前先解析为 ToolInvocation；
//! 工具名不在当前角色目录内、参数缺失/多余/类型不符，一律报 MalformedToolCall。

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::PipelineError;

/// 固定工具目录
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListFiles,
    ReadFile,
    WriteFile,
    ExecuteCommand,
    InspectCsvHead,
    TaskCompleted,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::ListFiles,
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::ExecuteCommand,
        ToolName::InspectCsvHead,
        ToolName::TaskCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ListFiles => "list_files",
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::ExecuteCommand => "execute_command",
            ToolName::InspectCsvHead => "inspect_csv_head",
            ToolName::TaskCompleted => "task_completed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// 给模型看的用途说明
    pub fn description(&self) -> &'static str {
        match self {
            ToolName::ListFiles => {
                "List directory entries (directories first). Set recursive=true to walk subdirectories."
            }
            ToolName::ReadFile => {
                "Read one or more text files with line numbers. Long files are truncated."
            }
            ToolName::WriteFile => {
                "Create or overwrite files. Parent directories are created as needed."
            }
            ToolName::ExecuteCommand => {
                "Run a shell command inside the workspace and return exit code, stdout and stderr."
            }
            ToolName::InspectCsvHead => {
                "Show the header and first rows of a CSV file as a Markdown table."
            }
            ToolName::TaskCompleted => "Signal that the current task is finished, with a short result.",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFilesArgs {
    #[serde(default = "default_list_paths")]
    #[schemars(description = "Directories relative to the workspace root (default [\".\"])")]
    pub paths: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Walk subdirectories")]
    pub recursive: bool,
}

fn default_list_paths() -> Vec<String> {
    vec![".".to_string()]
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadFileArgs {
    #[schemars(description = "Files relative to the workspace root")]
    pub paths: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteFileArgs {
    pub files: Vec<FileWrite>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteCommandArgs {
    pub command: String,
    #[schemars(description = "Working directory relative to the workspace root")]
    pub cwd: Option<String>,
    #[schemars(description = "Wall-clock timeout in milliseconds")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct InspectCsvHeadArgs {
    pub path: String,
    #[serde(default = "default_csv_rows")]
    #[schemars(description = "Number of data rows to show (default 5)")]
    pub rows: usize,
}

fn default_csv_rows() -> usize {
    5
}

#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TaskCompletedArgs {
    pub result: String,
}

/// 已校验的工具调用
#[derive(Clone, Debug, PartialEq)]
pub enum ToolInvocation {
    ListFiles(ListFilesArgs),
    ReadFile(ReadFileArgs),
    WriteFile(WriteFileArgs),
    ExecuteCommand(ExecuteCommandArgs),
    InspectCsvHead(InspectCsvHeadArgs),
    TaskCompleted(TaskCompletedArgs),
}

impl ToolInvocation {
    /// 按当前角色目录解析并校验一次调用
    pub fn parse(name: &str, args: &Value, catalogue: &[ToolName]) -> Result<Self, PipelineError> {
        let tool = ToolName::parse(name)
            .filter(|t| catalogue.contains(t))
            .ok_or_else(|| {
                let available: Vec<&str> = catalogue.iter().map(|t| t.as_str()).collect();
                PipelineError::MalformedToolCall(format!(
                    "unknown tool '{name}'; available: {}",
                    available.join(", ")
                ))
            })?;

        // 无参调用按空对象处理
        let args = match args {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let invalid = |e: serde_json::Error| {
            PipelineError::MalformedToolCall(format!("invalid arguments for '{tool}': {e}"))
        };

        let inv = match tool {
            ToolName::ListFiles => Self::ListFiles(serde_json::from_value(args).map_err(invalid)?),
            ToolName::ReadFile => {
                let a: ReadFileArgs = serde_json::from_value(args).map_err(invalid)?;
                if a.paths.is_empty() {
                    return Err(PipelineError::MalformedToolCall(
                        "read_file requires at least one path".into(),
                    ));
                }
                Self::ReadFile(a)
            }
            ToolName::WriteFile => {
                let a: WriteFileArgs = serde_json::from_value(args).map_err(invalid)?;
                if a.files.is_empty() {
                    return Err(PipelineError::MalformedToolCall(
                        "write_file requires at least one file".into(),
                    ));
                }
                Self::WriteFile(a)
            }
            ToolName::ExecuteCommand => {
                let a: ExecuteCommandArgs = serde_json::from_value(args).map_err(invalid)?;
                if a.command.trim().is_empty() {
                    return Err(PipelineError::MalformedToolCall("empty command".into()));
                }
                Self::ExecuteCommand(a)
            }
            ToolName::InspectCsvHead => {
                Self::InspectCsvHead(serde_json::from_value(args).map_err(invalid)?)
            }
            ToolName::TaskCompleted => {
                Self::TaskCompleted(serde_json::from_value(args).map_err(invalid)?)
            }
        };
        Ok(inv)
    }

    pub fn tool(&self) -> ToolName {
        match self {
            Self::ListFiles(_) => ToolName::ListFiles,
            Self::ReadFile(_) => ToolName::ReadFile,
            Self::WriteFile(_) => ToolName::WriteFile,
            Self::ExecuteCommand(_) => ToolName::ExecuteCommand,
            Self::InspectCsvHead(_) => ToolName::InspectCsvHead,
            Self::TaskCompleted(_) => ToolName::TaskCompleted,
        }
    }
}
