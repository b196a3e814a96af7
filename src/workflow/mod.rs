//! 幻灯片工作流：计划、生成清单、设计师与生成引擎

pub mod designer;
pub mod engine;
pub mod manifest;
pub mod plan;
pub mod prompts;

pub use designer::{AgentDesigner, DesignRequest, SlideDesigner};
pub use engine::SlideGenerationEngine;
pub use manifest::{Manifest, ManifestEntry, ManifestSnapshot, ManifestSummary, SlideStatus};
pub use plan::{normalize_document, parse_architect_plan, Plan, SlideId, SlideSpec};
pub use prompts::{architect_instruction, designer_instruction, PromptSet};

/// 架构师写出计划文档的工作区相对路径
pub const PLAN_PATH: &str = "slides/presentation_plan.json";
