//! 工具目录描述（schemars 自动生成参数 Schema）
//!
//! 拼入角色的 system prompt，说明调用格式与每个工具的参数结构，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::tools::args::{
    ExecuteCommandArgs, InspectCsvHeadArgs, ListFilesArgs, ReadFileArgs, TaskCompletedArgs,
    ToolName, WriteFileArgs,
};

/// 工具调用块的起止标记
pub const TOOL_CALL_START: &str = "<<<TOOL_CALL>>>";
pub const TOOL_CALL_END: &str = "<<<END_TOOL_CALL>>>";

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// 单个工具的参数 JSON Schema
pub fn parameters_schema(tool: ToolName) -> Value {
    match tool {
        ToolName::ListFiles => schema_of::<ListFilesArgs>(),
        ToolName::ReadFile => schema_of::<ReadFileArgs>(),
        ToolName::WriteFile => schema_of::<WriteFileArgs>(),
        ToolName::ExecuteCommand => schema_of::<ExecuteCommandArgs>(),
        ToolName::InspectCsvHead => schema_of::<InspectCsvHeadArgs>(),
        ToolName::TaskCompleted => schema_of::<TaskCompletedArgs>(),
    }
}

/// 生成目录说明：调用格式 + 每个工具的用途与 Schema
pub fn catalogue_prompt(catalogue: &[ToolName]) -> String {
    let mut out = String::from("## Tools\n\n");
    out.push_str(&format!(
        "To call a tool, emit a JSON object between markers, one block per call:\n\
         {TOOL_CALL_START}\n{{\"tool\": \"<name>\", \"parameters\": {{...}}}}\n{TOOL_CALL_END}\n\
         Several blocks may appear in one reply; they run in order. \
         A reply without any block ends the task.\n\n"
    ));
    for tool in catalogue {
        let schema = serde_json::to_string(&parameters_schema(*tool)).unwrap_or_default();
        out.push_str(&format!(
            "### {}\n{}\nParameters schema: {}\n\n",
            tool.as_str(),
            tool.description(),
            schema
        ));
    }
    out
}
