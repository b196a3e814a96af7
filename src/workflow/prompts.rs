//! 角色指令与任务指令模板
//!
//! 内置三份角色指令；配置了 prompts_dir 时，目录中的 collector.md / architect.md / designer.md
//! 覆盖对应内置文本（缺失的文件沿用内置）。

use std::path::Path;

use crate::core::PipelineError;
use crate::react::RoleKind;
use crate::workflow::{Plan, SlideSpec, PLAN_PATH};

const COLLECTOR: &str = "\
You are the research collector of a presentation team.
Explore the workspace to understand the material the user wants presented:
list directories, read documents, inspect data files and run read-only commands when useful.
Summarise key facts, figures and structure as you go. When you have gathered enough,
reply with a concise summary and no tool call.";

const ARCHITECT: &str = "\
You are the presentation architect. Using everything gathered earlier in this conversation,
design the slide deck: a clear narrative, one idea per slide, every relevant number and
quote carried into the slide content. You may use tools to fill gaps.";

const DESIGNER: &str = "\
You are a slide designer. You produce one self-contained HTML slide (16:9, inline CSS,
light background, high information density, no external assets).
Write the complete file with write_file at the exact path you are given, then stop.";

/// 三个角色的指令文本
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    pub collector: String,
    pub architect: String,
    pub designer: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            collector: COLLECTOR.to_string(),
            architect: ARCHITECT.to_string(),
            designer: DESIGNER.to_string(),
        }
    }
}

impl PromptSet {
    /// 读取覆盖目录；目录为 None 时全部使用内置文本
    pub async fn load(dir: Option<&Path>) -> Result<Self, PipelineError> {
        let mut set = Self::default();
        let Some(dir) = dir else {
            return Ok(set);
        };
        for kind in [RoleKind::Collector, RoleKind::Architect, RoleKind::Designer] {
            let path = dir.join(format!("{}.md", kind.as_str()));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::debug!(path = %path.display(), "prompt override loaded");
                    *set.slot_mut(kind) = text;
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(set)
    }

    pub fn for_role(&self, kind: RoleKind) -> &str {
        match kind {
            RoleKind::Collector => &self.collector,
            RoleKind::Architect => &self.architect,
            RoleKind::Designer => &self.designer,
        }
    }

    fn slot_mut(&mut self, kind: RoleKind) -> &mut String {
        match kind {
            RoleKind::Collector => &mut self.collector,
            RoleKind::Architect => &mut self.architect,
            RoleKind::Designer => &mut self.designer,
        }
    }
}

/// 架构师任务指令：要求把计划写到固定路径
pub fn architect_instruction() -> String {
    format!(
        r#"Based on everything collected so far, create the presentation plan.

Rules:
1. Write the plan with write_file to `{PLAN_PATH}` as plain JSON (no markdown fences).
2. Slide ids are "slide_1", "slide_2", ... in order, without gaps.
3. Every slide needs a non-empty "title" and a detailed "content" with all data points it must show.
4. When the file is written, call task_completed.

Format:
{{
  "title": "Presentation title",
  "theme": "optional visual theme shared by all slides",
  "slides": [
    {{"id": "slide_1", "title": "Slide title", "content": "Everything this slide must present"}}
  ]
}}"#
    )
}

/// 设计师任务指令；附带反馈时一并给出当前产物，让设计师在其基础上修改
pub fn designer_instruction(
    plan: &Plan,
    slide: &SlideSpec,
    artifact_path: &str,
    feedback: Option<&str>,
    current: Option<&str>,
) -> String {
    let position = plan
        .slides
        .iter()
        .position(|s| s.id == slide.id)
        .map(|i| i + 1)
        .unwrap_or(0);
    let mut out = format!(
        "Presentation: {}\nSlide {} of {} ({})\nTitle: {}\n\nContent to present:\n{}\n",
        plan.title,
        position,
        plan.slides.len(),
        slide.id,
        slide.title,
        slide.content_brief
    );
    if let Some(theme) = plan.theme.as_deref().filter(|t| !t.trim().is_empty()) {
        out.push_str(&format!("\nTheme: {theme}\n"));
    }
    match feedback {
        Some(feedback) => {
            out.push_str(&format!("\nRevise this slide according to the feedback:\n{feedback}\n"));
            if let Some(html) = current {
                out.push_str(&format!("\nCurrent HTML:\n```html\n{html}\n```\n"));
            }
            out.push_str(&format!(
                "\nWrite the revised slide with write_file to `{artifact_path}`."
            ));
        }
        None => out.push_str(&format!(
            "\nDesign the slide and write it with write_file to `{artifact_path}`."
        )),
    }
    out
}
