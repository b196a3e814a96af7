//! 设计师：为单张幻灯片产出 HTML 产物
//!
//! SlideDesigner 是生成引擎与具体实现之间的接缝；AgentDesigner 每次尝试都起一个全新对话的设计师运行，
//! 只看到计划标题、主题与本张幻灯片，不继承收集/架构阶段的历史。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsSection;
use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::react::{AgentRunner, BoundTranscript, Role, RoleKind};
use crate::tools::ToolGateway;
use crate::workflow::prompts::designer_instruction;
use crate::workflow::{Plan, SlideSpec};

/// 一次设计尝试的输入
#[derive(Clone, Debug)]
pub struct DesignRequest {
    pub workspace: PathBuf,
    pub plan: Arc<Plan>,
    pub slide: SlideSpec,
    /// 工作区相对路径，如 slides/slide_3.html
    pub artifact_path: String,
    pub feedback: Option<String>,
}

/// 单张幻灯片设计；成功即产物已写到 artifact_path
#[async_trait]
pub trait SlideDesigner: Send + Sync {
    async fn design(
        &self,
        request: DesignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError>;
}

/// 基于 Agent 循环的设计师
pub struct AgentDesigner {
    llm: Arc<dyn LlmClient>,
    tools: ToolsSection,
    max_iterations: usize,
    role: Arc<Role>,
}

impl AgentDesigner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolsSection,
        max_iterations: usize,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            max_iterations,
            role: Arc::new(Role::new(RoleKind::Designer, instructions)),
        }
    }
}

#[async_trait]
impl SlideDesigner for AgentDesigner {
    async fn design(
        &self,
        request: DesignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let slide = request.slide.id;
        let current = match request.feedback {
            Some(_) => tokio::fs::read_to_string(request.workspace.join(&request.artifact_path))
                .await
                .ok(),
            None => None,
        };
        let instruction = designer_instruction(
            &request.plan,
            &request.slide,
            &request.artifact_path,
            request.feedback.as_deref(),
            current.as_deref(),
        );

        let gateway = Arc::new(ToolGateway::new(&request.workspace, &self.tools));
        let runner = AgentRunner::new(self.llm.clone(), gateway)
            .with_max_iterations(self.max_iterations);
        let result = runner
            .run(BoundTranscript::fresh(self.role.clone()), &instruction, cancel)
            .await?;

        if !result.written_paths.iter().any(|p| *p == request.artifact_path) {
            return Err(PipelineError::SlideGenerationFailed {
                slide,
                reason: format!(
                    "designer finished without writing {}",
                    request.artifact_path
                ),
            });
        }
        tracing::debug!(slide_id = %slide, iterations = result.iterations, "slide designed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{last_user_message, MockLlmClient, ScriptedLlmClient};
    use crate::workflow::SlideId;

    fn request(dir: &std::path::Path, feedback: Option<&str>) -> DesignRequest {
        let slide = SlideSpec {
            id: SlideId::new(1),
            title: "Intro".into(),
            content_brief: "Agenda".into(),
        };
        DesignRequest {
            workspace: dir.to_path_buf(),
            plan: Arc::new(Plan::new("Deck", None, vec![slide.clone()])),
            artifact_path: slide.id.artifact_path(),
            slide,
            feedback: feedback.map(str::to_string),
        }
    }

    fn write_block(path: &str, html: &str) -> String {
        let params = serde_json::json!({"files": [{"path": path, "content": html}]});
        format!(
            "<<<TOOL_CALL>>>{}<<<END_TOOL_CALL>>>",
            serde_json::json!({"tool": "write_file", "parameters": params})
        )
    }

    #[tokio::test]
    async fn test_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::replies([
            write_block("slides/slide_1.html", "<h1>Intro</h1>"),
            "done".to_string(),
        ]));
        let designer = AgentDesigner::new(llm, ToolsSection::default(), 10, "design");
        designer
            .design(request(dir.path(), None), &CancellationToken::new())
            .await
            .unwrap();
        let html = std::fs::read_to_string(dir.path().join("slides/slide_1.html")).unwrap();
        assert_eq!(html, "<h1>Intro</h1>");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_failed_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::replies(["I think it looks great."]));
        let designer = AgentDesigner::new(llm, ToolsSection::default(), 10, "design");
        let err = designer
            .design(request(dir.path(), None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SlideGenerationFailed { .. }));
    }

    #[tokio::test]
    async fn test_feedback_run_sees_current_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("slides")).unwrap();
        std::fs::write(dir.path().join("slides/slide_1.html"), "<p>old</p>").unwrap();

        let llm = Arc::new(MockLlmClient::new(|messages| {
            let instruction = last_user_message(messages).unwrap_or_default();
            if instruction.contains("Tool result") {
                return Ok("revised".to_string());
            }
            assert!(instruction.contains("<p>old</p>"));
            assert!(instruction.contains("bigger"));
            Ok(write_block("slides/slide_1.html", "<p>new</p>"))
        }));
        let designer = AgentDesigner::new(llm, ToolsSection::default(), 10, "design");
        designer
            .design(request(dir.path(), Some("bigger")), &CancellationToken::new())
            .await
            .unwrap();
        let html = std::fs::read_to_string(dir.path().join("slides/slide_1.html")).unwrap();
        assert_eq!(html, "<p>new</p>");
    }
}
