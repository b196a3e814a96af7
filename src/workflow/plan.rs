//! 演示计划：有序的幻灯片描述
//!
//! SlideId 线上形式为 `slide_<n>`；重排不改变 id，新增幻灯片取 next_id，已用过的 id 永不复用。
//! 架构师产出的计划严格校验（字段齐全、id 为 slide_1..slide_n），错误原样上抛，不做修补。

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::core::PipelineError;

/// 幻灯片 id（从 1 开始）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlideId(u32);

impl SlideId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    /// 产物在工作区内的相对路径
    pub fn artifact_path(&self) -> String {
        format!("slides/{self}.html")
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slide_{}", self.0)
    }
}

impl FromStr for SlideId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("slide_").unwrap_or(s);
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(PipelineError::PlanValidation(format!(
                "invalid slide id '{s}', expected slide_<n> with n >= 1"
            ))),
        }
    }
}

impl Serialize for SlideId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlideId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            Value::Number(n) => n
                .as_u64()
                .filter(|n| *n > 0 && *n <= u32::MAX as u64)
                .map(|n| SlideId(n as u32))
                .ok_or_else(|| serde::de::Error::custom(format!("invalid slide id {n}"))),
            other => Err(serde::de::Error::custom(format!("invalid slide id {other}"))),
        }
    }
}

/// 单张幻灯片描述
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideSpec {
    pub id: SlideId,
    pub title: String,
    #[serde(rename = "content")]
    pub content_brief: String,
}

/// 演示计划
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    /// 计划级主题，原样交给每次设计师运行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub slides: Vec<SlideSpec>,
    /// 下一个可分配的 id 编号（高水位）
    #[serde(default)]
    next_id: u32,
}

impl Plan {
    /// 从幻灯片列表构造，next_id 取最大 id + 1
    pub fn new(title: impl Into<String>, theme: Option<String>, slides: Vec<SlideSpec>) -> Self {
        let next_id = slides.iter().map(|s| s.id.0).max().unwrap_or(0) + 1;
        Self {
            title: title.into(),
            theme,
            slides,
            next_id,
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next_id.max(self.max_id() + 1)
    }

    fn max_id(&self) -> u32 {
        self.slides.iter().map(|s| s.id.0).max().unwrap_or(0)
    }

    pub fn slide(&self, id: SlideId) -> Option<&SlideSpec> {
        self.slides.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<SlideId> {
        self.slides.iter().map(|s| s.id).collect()
    }

    /// 追加一张幻灯片，分配新 id
    pub fn add_slide(
        &mut self,
        title: impl Into<String>,
        content_brief: impl Into<String>,
    ) -> SlideId {
        let id = SlideId(self.next_id());
        self.slides.push(SlideSpec {
            id,
            title: title.into(),
            content_brief: content_brief.into(),
        });
        self.next_id = id.0 + 1;
        id
    }

    /// 删除；其 id 不会再被分配
    pub fn remove_slide(&mut self, id: SlideId) -> Result<SlideSpec, PipelineError> {
        let pos = self.position(id)?;
        self.next_id = self.next_id();
        Ok(self.slides.remove(pos))
    }

    /// 移动到 new_index（越界时放到末尾）；id 不变
    pub fn move_slide(&mut self, id: SlideId, new_index: usize) -> Result<(), PipelineError> {
        let pos = self.position(id)?;
        let spec = self.slides.remove(pos);
        let index = new_index.min(self.slides.len());
        self.slides.insert(index, spec);
        Ok(())
    }

    pub fn update_slide(
        &mut self,
        id: SlideId,
        title: Option<String>,
        content_brief: Option<String>,
    ) -> Result<(), PipelineError> {
        let pos = self.position(id)?;
        let spec = &mut self.slides[pos];
        if let Some(t) = title {
            spec.title = t;
        }
        if let Some(c) = content_brief {
            spec.content_brief = c;
        }
        Ok(())
    }

    fn position(&self, id: SlideId) -> Result<usize, PipelineError> {
        self.slides
            .iter()
            .position(|s| s.id == id)
            .ok_or(PipelineError::SlideNotFound(id))
    }

    /// 结构校验：非空、标题非空、id 唯一
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.slides.is_empty() {
            return Err(PipelineError::PlanValidation("plan has no slides".into()));
        }
        let mut seen = HashSet::new();
        for (i, slide) in self.slides.iter().enumerate() {
            if slide.title.trim().is_empty() {
                return Err(PipelineError::PlanValidation(format!(
                    "slide {} ({}) has an empty 'title'",
                    i + 1,
                    slide.id
                )));
            }
            if !seen.insert(slide.id) {
                return Err(PipelineError::PlanValidation(format!(
                    "duplicate slide id {}",
                    slide.id
                )));
            }
        }
        Ok(())
    }

    /// 人工保存的新版本：在 validate 之外，新出现的 id 必须不小于上一版的 next_id
    pub fn validate_successor(&self, previous: &Plan) -> Result<(), PipelineError> {
        self.validate()?;
        let known: HashSet<SlideId> = previous.slides.iter().map(|s| s.id).collect();
        let floor = previous.next_id();
        for slide in &self.slides {
            if !known.contains(&slide.id) && slide.id.0 < floor {
                return Err(PipelineError::PlanValidation(format!(
                    "slide id {} was used before and cannot be reused (next free id is slide_{floor})",
                    slide.id
                )));
            }
        }
        Ok(())
    }

    /// 保存前收紧高水位，保证跨版本不复用
    pub fn carry_high_water(&mut self, previous: Option<&Plan>) {
        let floor = previous.map(|p| p.next_id()).unwrap_or(1);
        self.next_id = self.next_id().max(floor);
    }
}

/// 清理常见的不可见字符：BOM 与各类 Unicode 空格
pub fn normalize_document(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .chars()
        .map(|c| match c {
            '\u{00a0}' | '\u{2000}'..='\u{200b}' | '\u{2028}' | '\u{2029}' | '\u{202f}'
            | '\u{205f}' | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

/// 解析并严格校验架构师写出的计划文档
pub fn parse_architect_plan(raw: &str) -> Result<Plan, PipelineError> {
    let doc = normalize_document(raw);
    let value: Value = serde_json::from_str(doc.trim())
        .map_err(|e| PipelineError::PlanValidation(format!("plan is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::PlanValidation("plan must be a JSON object".into()))?;

    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PipelineError::PlanValidation("plan is missing 'title'".into()))?
        .to_string();
    let theme = match obj.get("theme") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    let slides_raw = obj
        .get("slides")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::PlanValidation("plan is missing a 'slides' array".into()))?;
    if slides_raw.is_empty() {
        return Err(PipelineError::PlanValidation("'slides' is empty".into()));
    }

    let mut slides = Vec::with_capacity(slides_raw.len());
    for (i, raw_slide) in slides_raw.iter().enumerate() {
        let position = i + 1;
        let field = |name: &str| -> Result<String, PipelineError> {
            raw_slide
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    PipelineError::PlanValidation(format!(
                        "slide {position} is missing '{name}'"
                    ))
                })
        };
        let id: SlideId = field("id")?.parse()?;
        let expected = SlideId(position as u32);
        if id != expected {
            return Err(PipelineError::PlanValidation(format!(
                "slide {position} has id {id}, expected {expected} (ids must be unique and sequential)"
            )));
        }
        slides.push(SlideSpec {
            id,
            title: field("title")?,
            content_brief: field("content")?,
        });
    }
    Ok(Plan::new(title, theme, slides))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{
        "title": "Q3 Review",
        "theme": "dark, minimal",
        "slides": [
            {"id": "slide_1", "title": "Intro", "content": "Agenda"},
            {"id": "slide_2", "title": "Numbers", "content": "Revenue by region"},
            {"id": "slide_3", "title": "Outlook", "content": "Next quarter"}
        ]
    }"#;

    #[test]
    fn test_parse_valid_plan() {
        let plan = parse_architect_plan(&format!("\u{feff}{PLAN}")).unwrap();
        assert_eq!(plan.title, "Q3 Review");
        assert_eq!(plan.theme.as_deref(), Some("dark, minimal"));
        assert_eq!(plan.ids(), vec![SlideId(1), SlideId(2), SlideId(3)]);
        assert_eq!(plan.next_id(), 4);
        assert_eq!(plan.slides[1].content_brief, "Revenue by region");
    }

    #[test]
    fn test_missing_title_names_the_slide() {
        let raw = PLAN.replace(r#""title": "Numbers", "#, "");
        match parse_architect_plan(&raw) {
            Err(PipelineError::PlanValidation(msg)) => {
                assert!(msg.contains("slide 2"), "{msg}");
                assert!(msg.contains("title"), "{msg}");
            }
            other => panic!("Expected PlanValidation, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_or_gapped_ids_rejected() {
        let dup = PLAN.replace(r#""id": "slide_3""#, r#""id": "slide_2""#);
        assert!(matches!(parse_architect_plan(&dup), Err(PipelineError::PlanValidation(_))));
        let gap = PLAN.replace(r#""id": "slide_3""#, r#""id": "slide_7""#);
        assert!(matches!(parse_architect_plan(&gap), Err(PipelineError::PlanValidation(_))));
        assert!(parse_architect_plan(r#"{"title": "x", "slides": []}"#).is_err());
        assert!(parse_architect_plan("not json").is_err());
    }

    #[test]
    fn test_nbsp_is_normalized() {
        let raw = PLAN.replace("\"title\": \"Intro\"", "\"title\":\u{00a0}\"Intro\"");
        assert!(parse_architect_plan(&raw).is_ok());
    }

    #[test]
    fn test_ids_stable_on_reorder_and_never_reused() {
        let mut plan = parse_architect_plan(PLAN).unwrap();
        plan.move_slide(SlideId(3), 0).unwrap();
        assert_eq!(plan.ids(), vec![SlideId(3), SlideId(1), SlideId(2)]);

        plan.remove_slide(SlideId(3)).unwrap();
        let added = plan.add_slide("Appendix", "Sources");
        assert_eq!(added, SlideId(4));
        assert!(plan.slide(SlideId(3)).is_none());
    }

    #[test]
    fn test_successor_cannot_reuse_deleted_id() {
        let previous = parse_architect_plan(PLAN).unwrap();
        let mut edited = previous.clone();
        edited.remove_slide(SlideId(3)).unwrap();
        assert!(edited.validate_successor(&previous).is_ok());

        // 手写一个复用 slide_3 的版本，但它不在上一版中
        let saved = {
            let mut p = previous.clone();
            p.remove_slide(SlideId(3)).unwrap();
            p
        };
        let reused = Plan::new(
            "Q3 Review",
            None,
            vec![
                saved.slides[0].clone(),
                SlideSpec {
                    id: SlideId(3),
                    title: "Recycled".into(),
                    content_brief: "x".into(),
                },
            ],
        );
        assert!(reused.validate_successor(&saved).is_err());
    }

    #[test]
    fn test_slide_id_wire_format() {
        assert_eq!(serde_json::to_string(&SlideId(12)).unwrap(), "\"slide_12\"");
        let id: SlideId = serde_json::from_str("5").unwrap();
        assert_eq!(id, SlideId(5));
        assert!(serde_json::from_str::<SlideId>("\"slide_0\"").is_err());
        assert_eq!(SlideId(2).artifact_path(), "slides/slide_2.html");
    }
}
