//! 流水线错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 PipelineError 决定 ReportToModel / RetryAttempt / Surface。

use thiserror::Error;

use crate::core::Phase;
use crate::workflow::SlideId;

/// 流水线运行过程中可能出现的错误（模型、工具、路径逃逸、计划校验、阶段迁移等）
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 端点自身重试之后模型仍不可用
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Iteration limit exceeded after {0} turns")]
    IterationLimitExceeded(usize),

    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Invalid phase transition: {from} -> {to}: {reason}")]
    InvalidPhaseTransition {
        from: Phase,
        to: Phase,
        reason: String,
    },

    #[error("Slide generation failed for {slide}: {reason}")]
    SlideGenerationFailed { slide: SlideId, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Slide not found: {0}")]
    SlideNotFound(SlideId),

    /// 该幻灯片正在被批量生成占用，或尚未产出
    #[error("Slide {slide} is {status}")]
    SlideBusy { slide: SlideId, status: String },

    /// 阶段不允许该操作（不涉及迁移）
    #[error("Operation '{operation}' not allowed in phase {phase}")]
    OperationNotAllowed { operation: String, phase: Phase },

    /// ToolResult 与其 AssistantMessage 的调用顺序不符
    #[error("Transcript order violated: {0}")]
    TranscriptOrder(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// 工具级错误：在 Agent 循环内作为 ToolResult 回报给模型，不中断运行
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedToolCall(_)
                | PipelineError::ToolTimeout(_)
                | PipelineError::PathEscape(_)
                | PipelineError::ToolExecutionFailed(_)
        )
    }

    /// 错误种类的稳定短名，用于 ToolResult 负载与日志
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::MalformedToolCall(_) => "malformed_tool_call",
            PipelineError::ToolTimeout(_) => "tool_timeout",
            PipelineError::PathEscape(_) => "path_escape",
            PipelineError::ToolExecutionFailed(_) => "tool_execution_failed",
            PipelineError::IterationLimitExceeded(_) => "iteration_limit_exceeded",
            PipelineError::PlanValidation(_) => "plan_validation",
            PipelineError::InvalidPhaseTransition { .. } => "invalid_phase_transition",
            PipelineError::SlideGenerationFailed { .. } => "slide_generation_failed",
            PipelineError::Cancelled => "cancelled",
            PipelineError::TaskNotFound(_) => "task_not_found",
            PipelineError::SlideNotFound(_) => "slide_not_found",
            PipelineError::SlideBusy { .. } => "slide_busy",
            PipelineError::OperationNotAllowed { .. } => "operation_not_allowed",
            PipelineError::TranscriptOrder(_) => "transcript_order",
            PipelineError::Config(_) => "config",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 作为 ToolResult 错误写回对话，让模型自行修正
    ReportToModel(String),
    /// 丢弃本次尝试，按退避策略重新开始（设计师运行）
    RetryAttempt,
    /// 直接交给调用方，不重试
    Surface,
}
