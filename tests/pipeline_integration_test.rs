//! 流水线集成测试：收集 -> 架构 -> 生成 -> 重生成 -> 完成

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use slidesmith::config::AppConfig;
use slidesmith::core::{Phase, Pipeline, PipelineError, RoleModels};
use slidesmith::llm::{LlmClient, LlmError, MockLlmClient};
use slidesmith::memory::Message;
use slidesmith::workflow::{DesignRequest, Plan, SlideDesigner, SlideId, SlideStatus};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn block(tool: &str, parameters: serde_json::Value) -> String {
    format!(
        "<<<TOOL_CALL>>>{}<<<END_TOOL_CALL>>>",
        json!({"tool": tool, "parameters": parameters})
    )
}

/// 指令中的 "(slide_N)"
fn slide_in(text: &str) -> Option<u32> {
    let start = text.find("(slide_")? + "(slide_".len();
    let digits: String = text[start..].chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[derive(Clone, Copy, Default)]
struct Script {
    /// 架构师写出的计划里第 2 张缺 title
    bad_plan: bool,
    /// 设计师对这张幻灯片从不写文件
    failing_slide: Option<u32>,
}

/// 按 system 提示区分角色的脚本化模型
fn scripted_llm(script: Script) -> Arc<dyn LlmClient> {
    Arc::new(MockLlmClient::new(move |messages: &[Message]| {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let after_tool = last.starts_with("Tool result");

        if system.contains("research collector") {
            return Ok(if after_tool {
                "The brief covers Q3 revenue and hiring.".to_string()
            } else {
                block("read_file", json!({"paths": ["brief.md"]}))
            });
        }
        if system.contains("presentation architect") {
            if after_tool {
                return Ok("Plan written.".to_string());
            }
            let second = if script.bad_plan {
                json!({"id": "slide_2", "content": "Revenue by region"})
            } else {
                json!({"id": "slide_2", "title": "Revenue", "content": "Revenue by region"})
            };
            let plan = json!({
                "title": "Q3 Review",
                "theme": "light, corporate blue",
                "slides": [
                    {"id": "slide_1", "title": "Overview", "content": "Agenda"},
                    second,
                    {"id": "slide_3", "title": "Hiring", "content": "Headcount plan"}
                ]
            });
            return Ok(format!(
                "{}{}",
                block(
                    "write_file",
                    json!({"files": [{"path": "slides/presentation_plan.json", "content": plan.to_string()}]})
                ),
                block("task_completed", json!({"result": "plan ready"}))
            ));
        }
        if system.contains("slide designer") {
            if after_tool {
                return Ok("Slide finished.".to_string());
            }
            let Some(n) = slide_in(last) else {
                return Err(LlmError::Request("no slide in instruction".into()));
            };
            if script.failing_slide == Some(n) {
                return Ok("I could not design this one.".to_string());
            }
            let html = if last.contains("Revise this slide") {
                format!("<section>revised {n}</section>")
            } else {
                format!("<section>slide {n}</section>")
            };
            return Ok(block(
                "write_file",
                json!({"files": [{"path": format!("slides/slide_{n}.html"), "content": html}]}),
            ));
        }
        Err(LlmError::Request("unknown role".into()))
    }))
}

fn config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.tasks_dir = dir.join("tasks");
    cfg.generation.max_concurrent_slides = 2;
    cfg.generation.max_retries = 1;
    cfg.generation.base_delay_ms = 1;
    cfg.generation.max_delay_ms = 5;
    cfg
}

async fn pipeline(dir: &Path, script: Script) -> Pipeline {
    Pipeline::with_components(config(dir), RoleModels::shared(scripted_llm(script)), None)
        .await
        .unwrap()
}

fn workspace(dir: &Path) -> std::path::PathBuf {
    let ws = dir.join("material");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("brief.md"), "Q3 revenue grew 12%. Hiring 40 engineers.\n").unwrap();
    ws
}

#[tokio::test]
async fn test_full_pipeline_run() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), Script::default()).await;
    let task = p
        .create_task("Q3 deck", Some(workspace(dir.path())))
        .await
        .unwrap();

    let collected = p.start_collecting(&task.id, "Build a Q3 review deck").await.unwrap();
    assert!(collected.reply.contains("Q3 revenue"));

    let plan = p.run_architect(&task.id).await.unwrap();
    assert_eq!(plan.slides.len(), 3);
    assert_eq!(plan.theme.as_deref(), Some("light, corporate blue"));
    assert_eq!(p.get_task(&task.id).await.unwrap().phase.current(), Phase::EditingPlan);

    // 架构师看到的是同一份对话：收集阶段的回合全部保留
    let transcript = p.store().load_transcript(&task.id).await.unwrap();
    assert!(transcript.len() > collected.transcript_len);

    p.start_generation(&task.id).await.unwrap();
    let summary = p.wait_for_generation(&task.id).await.unwrap();
    assert_eq!((summary.total, summary.done, summary.failed), (3, 3, 0));
    assert_eq!(
        p.get_slide_artifact(&task.id, SlideId::new(2)).await.unwrap(),
        "<section>slide 2</section>"
    );

    let entry = p
        .regenerate_slide(&task.id, SlideId::new(2), Some("bigger numbers".into()))
        .await
        .unwrap();
    assert_eq!(entry.status, SlideStatus::Done);
    assert_eq!(entry.attempts, 2);
    assert_eq!(
        p.get_slide_artifact(&task.id, SlideId::new(2)).await.unwrap(),
        "<section>revised 2</section>"
    );
    assert_eq!(p.get_manifest(&task.id).await.unwrap().len(), 3);

    let done = p.complete_task(&task.id, false).await.unwrap();
    assert_eq!(done.phase.current(), Phase::Completed);
    let visited: Vec<Phase> = done.phase.history().iter().map(|r| r.phase).collect();
    assert_eq!(visited, vec![Phase::Collecting, Phase::EditingPlan, Phase::Designing]);
}

#[tokio::test]
async fn test_invalid_plan_keeps_collecting() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), Script { bad_plan: true, ..Script::default() }).await;
    let task = p.create_task("deck", Some(workspace(dir.path()))).await.unwrap();
    p.start_collecting(&task.id, "go").await.unwrap();
    let before = p.store().load_transcript(&task.id).await.unwrap();

    match p.run_architect(&task.id).await {
        Err(PipelineError::PlanValidation(msg)) => {
            assert!(msg.contains("slide 2"), "{msg}");
            assert!(msg.contains("title"), "{msg}");
        }
        other => panic!("Expected PlanValidation, got {other:?}"),
    }
    assert_eq!(p.get_task(&task.id).await.unwrap().phase.current(), Phase::Collecting);
    assert!(p.get_plan(&task.id).await.unwrap().is_none());
    assert_eq!(p.store().load_transcript(&task.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_failed_slide_needs_acknowledgement() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script {
        failing_slide: Some(3),
        ..Script::default()
    };
    let p = pipeline(dir.path(), script).await;
    let task = p.create_task("deck", Some(workspace(dir.path()))).await.unwrap();
    p.start_collecting(&task.id, "go").await.unwrap();
    p.run_architect(&task.id).await.unwrap();
    p.start_generation(&task.id).await.unwrap();
    let summary = p.wait_for_generation(&task.id).await.unwrap();
    assert_eq!((summary.done, summary.failed), (2, 1));

    let failed = p
        .get_manifest(&task.id)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.slide_id == SlideId::new(3))
        .unwrap();
    assert_eq!(failed.attempts, 2);
    assert!(matches!(
        p.get_slide_artifact(&task.id, SlideId::new(3)).await,
        Err(PipelineError::SlideBusy { .. })
    ));

    assert!(matches!(
        p.complete_task(&task.id, false).await,
        Err(PipelineError::InvalidPhaseTransition { .. })
    ));
    let done = p.complete_task(&task.id, true).await.unwrap();
    assert_eq!(done.phase.current(), Phase::Completed);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let task_id = {
        let p = pipeline(dir.path(), Script::default()).await;
        let task = p.create_task("deck", Some(workspace(dir.path()))).await.unwrap();
        p.start_collecting(&task.id, "go").await.unwrap();
        p.run_architect(&task.id).await.unwrap();
        p.start_generation(&task.id).await.unwrap();
        p.wait_for_generation(&task.id).await.unwrap();
        task.id
    };

    let p = pipeline(dir.path(), Script::default()).await;
    let task = p.get_task(&task_id).await.unwrap();
    assert_eq!(task.phase.current(), Phase::Designing);
    assert_eq!(p.get_plan(&task_id).await.unwrap().unwrap().slides.len(), 3);
    assert_eq!(p.get_progress(&task_id).await.unwrap().done, 3);
    assert_eq!(p.list_tasks().await.unwrap().len(), 1);

    // 回到计划编辑会作废清单
    p.return_to_plan_editing(&task_id).await.unwrap();
    assert!(p.get_manifest(&task_id).await.unwrap().is_empty());
    assert_eq!(p.get_task(&task_id).await.unwrap().phase.current(), Phase::EditingPlan);
}

#[tokio::test]
async fn test_generation_before_plan_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), Script::default()).await;
    let task = p.create_task("deck", None).await.unwrap();
    assert!(matches!(
        p.start_generation(&task.id).await,
        Err(PipelineError::InvalidPhaseTransition { .. })
    ));
    assert!(matches!(
        p.regenerate_slide(&task.id, SlideId::new(1), None).await,
        Err(PipelineError::OperationNotAllowed { .. })
    ));
}

/// 可在某张幻灯片上挂起的设计师，记录每次运行与同一张的重叠
#[derive(Default)]
struct HoldingDesigner {
    runs: Mutex<Vec<u32>>,
    active: Mutex<HashSet<u32>>,
    overlapped: AtomicBool,
    hold: Mutex<Option<u32>>,
    entered: Notify,
    release: Notify,
}

impl HoldingDesigner {
    fn hold(&self, slide: Option<u32>) {
        *self.hold.lock().unwrap() = slide;
    }

    fn runs_of(&self, slide: u32) -> usize {
        self.runs.lock().unwrap().iter().filter(|n| **n == slide).count()
    }
}

#[async_trait]
impl SlideDesigner for HoldingDesigner {
    async fn design(
        &self,
        request: DesignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let n = request.slide.id.number();
        self.runs.lock().unwrap().push(n);
        if !self.active.lock().unwrap().insert(n) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let held = *self.hold.lock().unwrap() == Some(n);
        let outcome = if held {
            self.entered.notify_one();
            tokio::select! {
                _ = self.release.notified() => Ok(()),
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            }
        } else {
            Ok(())
        };
        self.active.lock().unwrap().remove(&n);
        outcome
    }
}

/// 手工保存 n 张的计划并跑完一轮批量生成
async fn designed_task(
    dir: &Path,
    designer: Arc<HoldingDesigner>,
    limit: usize,
    slides: u32,
    hold: Option<u32>,
) -> (Pipeline, String) {
    let mut cfg = config(dir);
    cfg.generation.max_concurrent_slides = limit;
    let p = Pipeline::with_components(
        cfg,
        RoleModels::shared(scripted_llm(Script::default())),
        Some(designer.clone() as Arc<dyn SlideDesigner>),
    )
    .await
    .unwrap();
    let task = p.create_task("deck", None).await.unwrap();
    let mut plan = Plan::new("Deck", None, Vec::new());
    for i in 1..=slides {
        plan.add_slide(format!("Slide {i}"), format!("Content {i}"));
    }
    p.save_plan(&task.id, plan).await.unwrap();

    designer.hold(hold);
    p.start_generation(&task.id).await.unwrap();
    if hold.is_none() {
        let summary = p.wait_for_generation(&task.id).await.unwrap();
        assert_eq!(summary.done, slides as usize);
    }
    (p, task.id)
}

#[tokio::test]
async fn test_regeneration_in_flight_blocks_other_work_on_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let designer = Arc::new(HoldingDesigner::default());
    let (p, id) = designed_task(dir.path(), designer.clone(), 2, 2, None).await;
    let s1 = SlideId::new(1);

    designer.hold(Some(1));
    let (first, (second, start, reopen, complete)) = tokio::join!(
        p.regenerate_slide(&id, s1, Some("tighter".into())),
        async {
            designer.entered.notified().await;
            let second = p.regenerate_slide(&id, s1, None).await;
            let start = p.start_generation(&id).await;
            let reopen = p.return_to_plan_editing(&id).await;
            let complete = p.complete_task(&id, true).await;
            designer.release.notify_one();
            (second, start, reopen, complete)
        }
    );

    let entry = first.unwrap();
    assert_eq!((entry.status, entry.attempts), (SlideStatus::Done, 2));
    assert!(matches!(second, Err(PipelineError::SlideBusy { .. })), "{second:?}");
    assert!(matches!(start, Err(PipelineError::OperationNotAllowed { .. })), "{start:?}");
    assert!(matches!(reopen, Err(PipelineError::InvalidPhaseTransition { .. })), "{reopen:?}");
    assert!(matches!(complete, Err(PipelineError::InvalidPhaseTransition { .. })), "{complete:?}");

    // 只多设计了一次，且没有同时运行
    assert_eq!(designer.runs_of(1), 2);
    assert_eq!(designer.runs_of(2), 1);
    assert!(!designer.overlapped.load(Ordering::SeqCst));

    assert_eq!(p.get_task(&id).await.unwrap().phase.current(), Phase::Designing);
    let on_disk = p.store().load_manifest(&id).await.unwrap().unwrap();
    assert_eq!(on_disk.entries, p.get_manifest(&id).await.unwrap());
    assert_eq!(on_disk.summary().done, 2);
}

#[tokio::test]
async fn test_cancel_generation_stops_single_regeneration() {
    let dir = tempfile::tempdir().unwrap();
    let designer = Arc::new(HoldingDesigner::default());
    let (p, id) = designed_task(dir.path(), designer.clone(), 2, 3, None).await;
    let s2 = SlideId::new(2);

    designer.hold(Some(2));
    let (regen, _) = tokio::join!(p.regenerate_slide(&id, s2, None), async {
        designer.entered.notified().await;
        p.cancel_generation(&id).await.unwrap();
    });
    assert!(matches!(regen, Err(PipelineError::Cancelled)), "{regen:?}");
    let entry = p
        .get_manifest(&id)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.slide_id == s2)
        .unwrap();
    assert_eq!(entry.status, SlideStatus::Failed);
    assert_eq!(entry.last_error.as_deref(), Some("cancelled"));

    // 取消只作用于当时在跑的重生成
    designer.hold(None);
    let again = p.regenerate_slide(&id, s2, None).await.unwrap();
    assert_eq!(again.status, SlideStatus::Done);
    assert_eq!(p.get_progress(&id).await.unwrap().done, 3);
}

#[tokio::test]
async fn test_cancelled_generation_resumes_without_redoing_done_slides() {
    let dir = tempfile::tempdir().unwrap();
    let designer = Arc::new(HoldingDesigner::default());
    let (p, id) = designed_task(dir.path(), designer.clone(), 1, 4, Some(2)).await;

    designer.entered.notified().await;
    p.cancel_generation(&id).await.unwrap();
    let summary = p.wait_for_generation(&id).await.unwrap();
    assert_eq!(
        (summary.done, summary.failed, summary.pending),
        (1, 1, 2)
    );
    assert_eq!(designer.runs_of(3) + designer.runs_of(4), 0);

    designer.hold(None);
    let resumed = p.start_generation(&id).await.unwrap();
    assert_eq!((resumed.done, resumed.pending), (1, 3));
    let summary = p.wait_for_generation(&id).await.unwrap();
    assert_eq!((summary.done, summary.failed), (4, 0));

    assert_eq!(designer.runs_of(1), 1);
    assert_eq!(designer.runs_of(2), 2);
    assert_eq!(designer.runs_of(3), 1);
    assert_eq!(designer.runs_of(4), 1);
    let entries = p.get_manifest(&id).await.unwrap();
    assert_eq!(entries[1].attempts, 2);
}
