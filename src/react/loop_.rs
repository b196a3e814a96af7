//! Agent 主循环
//!
//! 追加指令 -> 请求模型 -> 解析调用块 -> 依次经网关执行并写回 ToolResult -> 下一轮；
//! 回复中没有调用块或调用了 task_completed 即结束。工具级错误写回对话让模型自行修正，
//! 模型不可用与轮数超限则中止本次运行。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{PipelineError, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::ToolCall;
use crate::react::parser::{parse_tool_calls, visible_text, ParsedCall};
use crate::react::{BoundTranscript, RunEvent};
use crate::tools::{ToolGateway, ToolOutcome};

/// 单次运行的默认轮数上限，防止死循环
pub const DEFAULT_MAX_ITERATIONS: usize = 40;

/// 运行结果：最终文本与追加后的对话记录
#[derive(Debug)]
pub struct RunResult {
    pub final_text: String,
    pub transcript: BoundTranscript,
    pub iterations: usize,
    /// 由 task_completed 结束（否则为无调用的回复）
    pub completed_by_signal: bool,
    /// 本次运行写入过的工作区相对路径（去重、按首次写入排序）
    pub written_paths: Vec<String>,
}

/// 驱动一个角色的模型↔工具循环
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    gateway: Arc<ToolGateway>,
    recovery: RecoveryEngine,
    max_iterations: usize,
    event_tx: Option<UnboundedSender<RunEvent>>,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, gateway: Arc<ToolGateway>) -> Self {
        Self {
            llm,
            gateway,
            recovery: RecoveryEngine::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_tx: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    pub async fn run(
        &self,
        mut bound: BoundTranscript,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<RunResult, PipelineError> {
        let role = bound.role().kind;
        let system_prompt = bound.role().system_prompt();
        let catalogue = bound.role().catalogue.clone();
        bound.transcript_mut().push_user(instruction)?;

        let mut written_paths: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.send(RunEvent::Iteration {
                role,
                iteration,
                max_iterations: self.max_iterations,
            });

            let messages = bound.transcript().render(&system_prompt);
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                r = self.llm.complete(&messages) => r.map_err(|e| {
                    PipelineError::ModelUnavailable(format!("{}: {e}", self.llm.model()))
                })?,
            };

            let parsed = parse_tool_calls(&reply);
            let text = visible_text(&reply);
            tracing::debug!(role = %role, iteration, calls = parsed.len(), "model reply");
            if !text.is_empty() {
                self.send(RunEvent::AssistantText {
                    role,
                    text: text.clone(),
                });
            }

            if parsed.is_empty() {
                bound.transcript_mut().push_assistant(reply, Vec::new())?;
                self.send(RunEvent::Completed {
                    role,
                    text: text.clone(),
                });
                return Ok(RunResult {
                    final_text: text,
                    transcript: bound,
                    iterations: iteration,
                    completed_by_signal: false,
                    written_paths,
                });
            }

            let calls: Vec<ToolCall> = parsed
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let id = bound.transcript().next_call_id(i);
                    match p {
                        ParsedCall::Valid { tool, parameters } => ToolCall {
                            id,
                            name: tool.clone(),
                            arguments: parameters.clone(),
                        },
                        ParsedCall::Invalid { raw, .. } => ToolCall {
                            id,
                            name: String::new(),
                            arguments: Value::String(raw.clone()),
                        },
                    }
                })
                .collect();
            bound.transcript_mut().push_assistant(reply, calls.clone())?;

            let mut completion = None;
            for (call, parsed) in calls.iter().zip(&parsed) {
                self.send(RunEvent::ToolCall {
                    role,
                    tool: call.name.clone(),
                    args: call.arguments.clone(),
                });
                let outcome = match parsed {
                    ParsedCall::Invalid { reason, .. } => ToolOutcome::failure(
                        &PipelineError::MalformedToolCall(reason.clone()),
                        &self.recovery,
                    ),
                    ParsedCall::Valid { .. } => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        o = self.gateway.execute(call, &catalogue) => o,
                    },
                };

                for path in &outcome.written {
                    if !written_paths.contains(path) {
                        written_paths.push(path.clone());
                    }
                }
                self.send(RunEvent::ToolResult {
                    role,
                    tool: call.name.clone(),
                    is_error: outcome.is_error,
                });
                let tool_label = if call.name.is_empty() {
                    "<unparsed>"
                } else {
                    call.name.as_str()
                };
                bound.transcript_mut().push_tool_result(
                    &call.id,
                    tool_label,
                    outcome.payload,
                    outcome.is_error,
                )?;
                if outcome.completion.is_some() {
                    completion = outcome.completion;
                }
            }

            if let Some(result) = completion {
                self.send(RunEvent::Completed {
                    role,
                    text: result.clone(),
                });
                return Ok(RunResult {
                    final_text: result,
                    transcript: bound,
                    iterations: iteration,
                    completed_by_signal: true,
                    written_paths,
                });
            }
        }

        tracing::warn!(role = %role, max = self.max_iterations, "iteration limit exceeded");
        Err(PipelineError::IterationLimitExceeded(self.max_iterations))
    }
}
