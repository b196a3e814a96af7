//! 工具执行网关
//!
//! 绑定一个工作区，校验调用参数后派发到具体工具；每次调用施加总超时，
//! 错误一律折叠为 ToolResult 负载（is_error），并输出结构化审计日志（JSON）。

use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::config::ToolsSection;
use crate::core::{PipelineError, RecoveryAction, RecoveryEngine};
use crate::memory::ToolCall;
use crate::tools::args::{ToolInvocation, ToolName};
use crate::tools::filesystem::{IgnoreRules, ReadLimits, SafeFs};
use crate::tools::shell::ShellRunner;
use crate::tools::tabular::inspect_csv_head;

/// 一次调用的结果，供 Agent 循环写回对话
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub payload: Value,
    pub is_error: bool,
    /// task_completed 携带的结果；Some 时循环应结束
    pub completion: Option<String>,
    /// 本次成功写入的工作区相对路径
    pub written: Vec<String>,
}

impl ToolOutcome {
    fn ok(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
            completion: None,
            written: Vec::new(),
        }
    }

    /// 工具级错误的回报负载，附带给模型的修正提示
    pub fn failure(err: &PipelineError, recovery: &RecoveryEngine) -> Self {
        let hint = match recovery.handle(err) {
            RecoveryAction::ReportToModel(hint) => hint,
            _ => err.to_string(),
        };
        Self {
            payload: json!({"error": err.kind(), "message": err.to_string(), "hint": hint}),
            is_error: true,
            completion: None,
            written: Vec::new(),
        }
    }
}

/// 工具网关：一个工作区一个实例
#[derive(Debug, Clone)]
pub struct ToolGateway {
    fs: SafeFs,
    shell: ShellRunner,
    ignore: IgnoreRules,
    limits: ReadLimits,
    tool_timeout: Duration,
    command_timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolGateway {
    pub fn new(workspace_root: impl AsRef<Path>, cfg: &ToolsSection) -> Self {
        Self {
            fs: SafeFs::new(workspace_root),
            shell: ShellRunner::new(&cfg.allowed_commands),
            ignore: IgnoreRules::new(&cfg.ignore_patterns),
            limits: ReadLimits {
                max_lines: cfg.read_max_lines,
                data_file_max_lines: cfg.data_file_max_lines,
            },
            tool_timeout: Duration::from_secs(cfg.tool_timeout_secs),
            command_timeout: Duration::from_millis(cfg.command_timeout_ms),
            recovery: RecoveryEngine::new(),
        }
    }

    /// 执行一次模型请求的调用；永不失败，错误变为 is_error 负载
    pub async fn execute(&self, call: &ToolCall, catalogue: &[ToolName]) -> ToolOutcome {
        let start = Instant::now();
        let result = match ToolInvocation::parse(&call.name, &call.arguments, catalogue) {
            Ok(invocation) => timeout(self.tool_timeout, self.dispatch(invocation))
                .await
                .unwrap_or_else(|_| {
                    Err(PipelineError::ToolTimeout(format!(
                        "{} exceeded {}s",
                        call.name,
                        self.tool_timeout.as_secs()
                    )))
                }),
            Err(e) => Err(e),
        };

        let outcome_label = match &result {
            Ok(o) if o.is_error => "error".to_string(),
            Ok(_) => "ok".to_string(),
            Err(e) => e.kind().to_string(),
        };
        let audit = json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "outcome": outcome_label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(outcome) => outcome,
            Err(err) => ToolOutcome::failure(&err, &self.recovery),
        }
    }

    /// 派发已校验的调用
    pub async fn dispatch(&self, invocation: ToolInvocation) -> Result<ToolOutcome, PipelineError> {
        match invocation {
            ToolInvocation::ListFiles(a) => {
                let (fs, ignore) = (self.fs.clone(), self.ignore.clone());
                blocking(move || fs.list_files(&a.paths, a.recursive, &ignore))
                    .await
                    .map(ToolOutcome::ok)
            }
            ToolInvocation::ReadFile(a) => {
                let (fs, limits) = (self.fs.clone(), self.limits);
                blocking(move || fs.read_files(&a.paths, limits))
                    .await
                    .map(ToolOutcome::ok)
            }
            ToolInvocation::WriteFile(a) => {
                let fs = self.fs.clone();
                let files: Vec<(String, String)> =
                    a.files.into_iter().map(|f| (f.path, f.content)).collect();
                let (payload, written) = blocking(move || fs.write_files(&files)).await?;
                Ok(ToolOutcome {
                    written,
                    ..ToolOutcome::ok(payload)
                })
            }
            ToolInvocation::ExecuteCommand(a) => {
                let cwd = match a.cwd.as_deref() {
                    Some(dir) => self.fs.resolve(dir)?,
                    None => self.fs.root().to_path_buf(),
                };
                let limit = a
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.command_timeout);
                let payload = self.shell.run(&a.command, &cwd, limit).await?;
                let failed = payload["success"] != Value::Bool(true);
                Ok(ToolOutcome {
                    is_error: failed,
                    ..ToolOutcome::ok(payload)
                })
            }
            ToolInvocation::InspectCsvHead(a) => {
                let path = self.fs.resolve(&a.path)?;
                let display = self.fs.relative(&path);
                blocking(move || inspect_csv_head(&path, &display, a.rows))
                    .await
                    .map(ToolOutcome::ok)
            }
            ToolInvocation::TaskCompleted(a) => Ok(ToolOutcome {
                completion: Some(a.result.clone()),
                ..ToolOutcome::ok(json!({"status": "completed", "result": a.result}))
            }),
        }
    }
}

/// 同步文件操作放到阻塞线程池，避免卡住运行时
async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::ToolExecutionFailed(format!("tool task aborted: {e}")))?
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
