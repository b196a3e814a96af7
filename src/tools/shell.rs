//! 命令执行：禁止危险操作，可选命令白名单
//!
//! 禁止 rm -rf、wget、chmod 777 等子串；白名单非空时只允许其中的命令名（首词）。
//! 执行通过 sh -c / cmd /C，工作目录限定在沙箱内，超时返回 ToolTimeout。

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;

use crate::core::PipelineError;

/// 禁止的命令/子串（即使白名单中有同名，也不允许带这些参数）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "shutdown",
    "reboot",
    ":(){ :|:& };:", // fork bomb
];

/// 输出回传给模型前的截断长度
const MAX_OUTPUT_CHARS: usize = 20_000;

/// 命令执行器
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    allowed_commands: HashSet<String>,
}

impl ShellRunner {
    pub fn new(allowed_commands: &[String]) -> Self {
        let allowed_commands = allowed_commands.iter().map(|s| s.to_lowercase()).collect();
        Self { allowed_commands }
    }

    /// 解析命令：只取第一个 token 作为命令名
    fn command_name(raw: &str) -> &str {
        raw.split_whitespace().next().unwrap_or("")
    }

    fn check_allowed(&self, raw: &str) -> Result<(), PipelineError> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(PipelineError::ToolExecutionFailed(format!(
                    "Forbidden pattern: {forbidden}"
                )));
            }
        }
        let name = Self::command_name(&raw_lower);
        if name.is_empty() {
            return Err(PipelineError::ToolExecutionFailed("Empty command".into()));
        }
        if self.allowed_commands.is_empty() || self.allowed_commands.contains(name) {
            return Ok(());
        }
        Err(PipelineError::ToolExecutionFailed(format!(
            "Command '{name}' not in allowlist"
        )))
    }

    /// 在 cwd 下执行；非零退出码不算错误，由调用方决定是否标记 is_error
    pub async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<Value, PipelineError> {
        let command = command.trim();
        self.check_allowed(command)?;
        if !cwd.is_dir() {
            return Err(PipelineError::ToolExecutionFailed(format!(
                "Working directory does not exist: {}",
                cwd.display()
            )));
        }

        tracing::info!(command = %command, "execute_command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(cwd).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                PipelineError::ToolTimeout(format!(
                    "execute_command exceeded {}ms: {command}",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| PipelineError::ToolExecutionFailed(format!("Execution failed: {e}")))?;

        let exit_code = output.status.code();
        Ok(json!({
            "command": command,
            "exit_code": exit_code,
            "success": output.status.success(),
            "stdout": clip(&String::from_utf8_lossy(&output.stdout)),
            "stderr": clip(&String::from_utf8_lossy(&output.stderr)),
        }))
    }
}

fn clip(s: &str) -> String {
    if s.chars().count() > MAX_OUTPUT_CHARS {
        let head: String = s.chars().take(MAX_OUTPUT_CHARS).collect();
        format!("{head}\n... output truncated")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_patterns_and_allowlist() {
        let open = ShellRunner::new(&[]);
        assert!(open.check_allowed("ls -la").is_ok());
        assert!(open.check_allowed("rm -rf /").is_err());

        let strict = ShellRunner::new(&["python3".to_string(), "ls".to_string()]);
        assert!(strict.check_allowed("python3 analyze.py").is_ok());
        assert!(strict.check_allowed("cat secrets").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_cwd_and_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let runner = ShellRunner::default();

        let out = runner
            .run("ls", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(out["exit_code"], 0);

        let out = runner
            .run("exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert_eq!(out["exit_code"], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_tool_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellRunner::default()
            .run("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolTimeout(_)));
    }
}
