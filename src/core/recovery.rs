//! 错误恢复引擎
//!
//! 根据 PipelineError 类型返回 RecoveryAction，供 Agent 循环与幻灯片生成引擎决定是回报模型、重试还是上抛。

use crate::core::{PipelineError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &PipelineError) -> RecoveryAction {
        match err {
            PipelineError::MalformedToolCall(msg) => RecoveryAction::ReportToModel(format!(
                "{msg}. Emit each call as {{\"tool\": \"<name>\", \"parameters\": {{...}}}} \
                 between <<<TOOL_CALL>>> and <<<END_TOOL_CALL>>>, using only the listed tools."
            )),
            PipelineError::ToolTimeout(tool) => RecoveryAction::ReportToModel(format!(
                "Tool '{tool}' timed out. Try a cheaper operation or a larger timeout."
            )),
            PipelineError::PathEscape(path) => RecoveryAction::ReportToModel(format!(
                "Path '{path}' resolves outside the workspace. Use paths relative to the workspace root."
            )),
            PipelineError::ToolExecutionFailed(msg) => RecoveryAction::ReportToModel(msg.clone()),
            // 设计师运行级失败：整次尝试重来
            PipelineError::ModelUnavailable(_)
            | PipelineError::IterationLimitExceeded(_)
            | PipelineError::SlideGenerationFailed { .. }
            | PipelineError::Io(_) => RecoveryAction::RetryAttempt,
            _ => RecoveryAction::Surface,
        }
    }

    /// 设计师尝试失败后是否值得再试
    pub fn is_retryable(&self, err: &PipelineError) -> bool {
        matches!(self.handle(err), RecoveryAction::RetryAttempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Phase;
    use crate::workflow::SlideId;

    #[test]
    fn test_tool_level_errors_are_reported_to_model() {
        let engine = RecoveryEngine::new();
        for err in [
            PipelineError::MalformedToolCall("unknown tool 'fly'".into()),
            PipelineError::ToolTimeout("execute_command".into()),
            PipelineError::PathEscape("../secret".into()),
        ] {
            assert!(err.is_tool_level());
            assert!(matches!(engine.handle(&err), RecoveryAction::ReportToModel(_)));
        }
    }

    #[test]
    fn test_malformed_hint_mentions_markers() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&PipelineError::MalformedToolCall("bad".into()));
        match action {
            RecoveryAction::ReportToModel(msg) => assert!(msg.contains("<<<TOOL_CALL>>>")),
            other => panic!("Expected ReportToModel, got {other:?}"),
        }
    }

    #[test]
    fn test_run_level_errors_retry() {
        let engine = RecoveryEngine::new();
        assert!(engine.is_retryable(&PipelineError::ModelUnavailable("503".into())));
        assert!(engine.is_retryable(&PipelineError::IterationLimitExceeded(40)));
        assert!(engine.is_retryable(&PipelineError::SlideGenerationFailed {
            slide: SlideId::new(2),
            reason: "artifact not written".into(),
        }));
    }

    #[test]
    fn test_never_retried() {
        let engine = RecoveryEngine::new();
        assert!(!engine.is_retryable(&PipelineError::Cancelled));
        assert!(!engine.is_retryable(&PipelineError::PlanValidation("x".into())));
        assert!(!engine.is_retryable(&PipelineError::InvalidPhaseTransition {
            from: Phase::Collecting,
            to: Phase::Designing,
            reason: "no plan".into(),
        }));
    }
}
