//! 流水线编排器
//!
//! 对外暴露任务级操作：收集、架构、计划编辑、批量生成、单张重生成、产物读取与完成。
//! 每个任务的阶段迁移都经过 PhaseState 守卫；生成引擎全局唯一，闸门跨任务共享。
//! 收集/架构运行失败时，已落盘的对话记录保持不变。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, LlmSection};
use crate::core::{
    Phase, PipelineError, RetryPolicy, TaskRecord, TaskStore, TransitionGuard,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::memory::write_json_atomic;
use crate::react::{switch_role, AgentRunner, BoundTranscript, Role, RoleKind, RunEvent};
use crate::tools::ToolGateway;
use crate::workflow::{
    architect_instruction, parse_architect_plan, AgentDesigner, Manifest, ManifestEntry,
    ManifestSummary, Plan, PromptSet, SlideDesigner, SlideGenerationEngine, SlideId, SlideStatus,
    PLAN_PATH,
};

/// 各角色使用的模型客户端
#[derive(Clone)]
pub struct RoleModels {
    pub collector: Arc<dyn LlmClient>,
    pub architect: Arc<dyn LlmClient>,
    pub designer: Arc<dyn LlmClient>,
}

impl RoleModels {
    /// 三个角色共用一个客户端
    pub fn shared(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            collector: llm.clone(),
            architect: llm.clone(),
            designer: llm,
        }
    }
}

/// 按 [llm] 段为某个角色构造客户端，外层包端点级重试
pub fn create_llm_for_role(
    cfg: &LlmSection,
    role: RoleKind,
) -> Result<Arc<dyn LlmClient>, PipelineError> {
    let model = match role {
        RoleKind::Collector => cfg.model.clone(),
        RoleKind::Architect => cfg.architect_model.clone().unwrap_or_else(|| cfg.model.clone()),
        RoleKind::Designer => cfg.designer_model.clone().unwrap_or_else(|| cfg.model.clone()),
    };
    let inner: Arc<dyn LlmClient> = match cfg.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::warn!(role = %role, "using mock LLM");
            Arc::new(MockLlmClient::default())
        }
        "openai" => {
            let api_key = cfg
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| {
                    PipelineError::Config(
                        "no API key: set llm.api_key or OPENAI_API_KEY".to_string(),
                    )
                })?;
            tracing::info!(role = %role, model = %model, "using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &model,
                &api_key,
                std::time::Duration::from_secs(cfg.request_timeout_secs),
            ))
        }
        other => {
            return Err(PipelineError::Config(format!(
                "unknown llm provider '{other}'"
            )))
        }
    };
    let policy = RetryPolicy {
        max_retries: cfg.max_retries,
        ..RetryPolicy::default()
    };
    Ok(Arc::new(RetryingLlmClient::new(inner, policy)))
}

/// 收集运行的结果
#[derive(Clone, Debug, Serialize)]
pub struct CollectOutcome {
    pub reply: String,
    pub iterations: usize,
    pub transcript_len: usize,
}

/// 进行中的批量生成：取消令牌 + 完成时发布汇总
struct GenerationHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Option<ManifestSummary>>,
}

impl GenerationHandle {
    fn is_active(&self) -> bool {
        self.done.borrow().is_none() && self.done.has_changed().is_ok()
    }
}

/// 单个任务的运行期状态
struct TaskSlot {
    record: tokio::sync::Mutex<TaskRecord>,
    /// 串行化该任务的收集/架构运行
    agent_lock: tokio::sync::Mutex<()>,
    plan: Mutex<Option<Arc<Plan>>>,
    manifest: Mutex<Option<Arc<Manifest>>>,
    generation: Mutex<Option<GenerationHandle>>,
    /// 正在单张重生成的幻灯片
    regenerating: Mutex<HashSet<SlideId>>,
    /// 单张重生成共用的取消令牌；取消后换新
    regen_cancel: Mutex<CancellationToken>,
}

/// 单张重生成的占位，drop 时释放
struct RegenClaim {
    slot: Arc<TaskSlot>,
    slide: SlideId,
}

impl Drop for RegenClaim {
    fn drop(&mut self) {
        self.slot
            .regenerating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.slide);
    }
}

impl TaskSlot {
    fn plan(&self) -> Option<Arc<Plan>> {
        self.plan.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_plan(&self, plan: Option<Arc<Plan>>) {
        *self.plan.lock().unwrap_or_else(|e| e.into_inner()) = plan;
    }

    fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_manifest(&self, manifest: Option<Arc<Manifest>>) {
        *self.manifest.lock().unwrap_or_else(|e| e.into_inner()) = manifest;
    }

    fn generation_active(&self) -> bool {
        self.generation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(GenerationHandle::is_active)
    }

    fn regenerations_active(&self) -> bool {
        !self
            .regenerating
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// 批量生成或任一单张重生成在进行
    fn busy(&self) -> bool {
        self.generation_active() || self.regenerations_active()
    }

    /// 占住一张幻灯片；已被占用时返回 SlideBusy
    fn claim(self: &Arc<Self>, slide: SlideId, status: SlideStatus) -> Result<RegenClaim, PipelineError> {
        let mut regenerating = self.regenerating.lock().unwrap_or_else(|e| e.into_inner());
        if !regenerating.insert(slide) {
            return Err(PipelineError::SlideBusy {
                slide,
                status: status.to_string(),
            });
        }
        Ok(RegenClaim {
            slot: self.clone(),
            slide,
        })
    }

    fn regen_token(&self) -> CancellationToken {
        self.regen_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cancel_regenerations(&self) {
        let old = std::mem::replace(
            &mut *self.regen_cancel.lock().unwrap_or_else(|e| e.into_inner()),
            CancellationToken::new(),
        );
        old.cancel();
    }

    fn guard(&self, acknowledge_failures: bool) -> TransitionGuard {
        let summary = self.manifest().map(|m| m.summary()).unwrap_or_default();
        TransitionGuard {
            has_plan: self.plan().is_some(),
            generation_active: self.busy(),
            unfinished: summary.unfinished(),
            failed: summary.failed,
            acknowledge_failures,
        }
    }
}

fn not_allowed(operation: &str, phase: Phase) -> PipelineError {
    PipelineError::OperationNotAllowed {
        operation: operation.to_string(),
        phase,
    }
}

/// 多任务流水线
pub struct Pipeline {
    cfg: AppConfig,
    store: TaskStore,
    models: RoleModels,
    collector: Arc<Role>,
    architect: Arc<Role>,
    engine: Arc<SlideGenerationEngine>,
    tasks: tokio::sync::RwLock<HashMap<String, Arc<TaskSlot>>>,
    event_tx: Option<UnboundedSender<RunEvent>>,
}

impl Pipeline {
    /// 按配置构造各角色模型与设计师
    pub async fn new(cfg: AppConfig) -> Result<Self, PipelineError> {
        let models = RoleModels {
            collector: create_llm_for_role(&cfg.llm, RoleKind::Collector)?,
            architect: create_llm_for_role(&cfg.llm, RoleKind::Architect)?,
            designer: create_llm_for_role(&cfg.llm, RoleKind::Designer)?,
        };
        Self::with_components(cfg, models, None).await
    }

    /// 注入模型与（可选）设计师实现
    pub async fn with_components(
        cfg: AppConfig,
        models: RoleModels,
        designer: Option<Arc<dyn SlideDesigner>>,
    ) -> Result<Self, PipelineError> {
        let prompts = PromptSet::load(cfg.app.prompts_dir.as_deref()).await?;
        let designer = designer.unwrap_or_else(|| {
            Arc::new(AgentDesigner::new(
                models.designer.clone(),
                cfg.tools.clone(),
                cfg.agent.max_iterations,
                prompts.designer.clone(),
            ))
        });
        let engine = Arc::new(SlideGenerationEngine::from_config(designer, &cfg.generation));
        Ok(Self {
            store: TaskStore::new(&cfg.app.tasks_dir),
            collector: Arc::new(Role::new(RoleKind::Collector, prompts.collector.clone())),
            architect: Arc::new(Role::new(RoleKind::Architect, prompts.architect.clone())),
            cfg,
            models,
            engine,
            tasks: tokio::sync::RwLock::new(HashMap::new()),
            event_tx: None,
        })
    }

    /// 收集/架构运行的过程事件
    pub fn with_event_tx(mut self, tx: UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    fn runner(&self, llm: Arc<dyn LlmClient>, record: &TaskRecord) -> AgentRunner {
        let gateway = Arc::new(ToolGateway::new(&record.workspace, &self.cfg.tools));
        let runner =
            AgentRunner::new(llm, gateway).with_max_iterations(self.cfg.agent.max_iterations);
        match &self.event_tx {
            Some(tx) => runner.with_event_tx(tx.clone()),
            None => runner,
        }
    }

    /// 取运行期状态；首次访问时从磁盘恢复
    async fn slot(&self, task_id: &str) -> Result<Arc<TaskSlot>, PipelineError> {
        if let Some(slot) = self.tasks.read().await.get(task_id) {
            return Ok(slot.clone());
        }
        let record = self.store.load_record(task_id).await?;
        let plan = self.store.load_plan(task_id).await?.map(Arc::new);
        let manifest = match self.store.load_manifest(task_id).await? {
            Some(snapshot) => {
                let interrupted = snapshot.summary().running;
                let manifest = Arc::new(
                    Manifest::from_snapshot(snapshot).with_store(self.store.manifest_path(task_id)?),
                );
                if interrupted > 0 {
                    tracing::warn!(task_id, interrupted, "marking interrupted slides as failed");
                    manifest.persist().await?;
                }
                Some(manifest)
            }
            None => None,
        };
        let slot = Arc::new(TaskSlot {
            record: tokio::sync::Mutex::new(record),
            agent_lock: tokio::sync::Mutex::new(()),
            plan: Mutex::new(plan),
            manifest: Mutex::new(manifest),
            generation: Mutex::new(None),
            regenerating: Mutex::new(HashSet::new()),
            regen_cancel: Mutex::new(CancellationToken::new()),
        });
        let mut tasks = self.tasks.write().await;
        Ok(tasks.entry(task_id.to_string()).or_insert(slot).clone())
    }

    async fn save_record(&self, record: &mut TaskRecord) -> Result<(), PipelineError> {
        record.touch();
        self.store.save_record(record).await
    }

    pub async fn create_task(
        &self,
        name: &str,
        workspace: Option<PathBuf>,
    ) -> Result<TaskRecord, PipelineError> {
        let record = self.store.create(name, workspace).await?;
        self.slot(&record.id).await?;
        Ok(record)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, PipelineError> {
        let slot = self.slot(task_id).await?;
        let record = slot.record.lock().await;
        Ok(record.clone())
    }

    /// 最近更新的在前
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, PipelineError> {
        self.store.load_all().await
    }

    /// 开始或继续收集：在已有对话上追加一次收集者运行
    pub async fn start_collecting(
        &self,
        task_id: &str,
        user_request: &str,
    ) -> Result<CollectOutcome, PipelineError> {
        let slot = self.slot(task_id).await?;
        let _running = slot.agent_lock.lock().await;
        let record = slot.record.lock().await.clone();
        if record.phase.current() != Phase::Collecting {
            return Err(not_allowed("start_collecting", record.phase.current()));
        }

        let transcript = self.store.load_transcript(task_id).await?;
        let bound = BoundTranscript::new(transcript, self.collector.clone());
        let result = self
            .runner(self.models.collector.clone(), &record)
            .run(bound, user_request, &CancellationToken::new())
            .await?;

        let transcript = result.transcript.into_transcript();
        self.store.save_transcript(task_id, &transcript).await?;
        self.save_record(&mut *slot.record.lock().await).await?;
        let (prompt_tokens, completion_tokens, _) = self.models.collector.token_usage();
        tracing::info!(
            task_id,
            iterations = result.iterations,
            prompt_tokens,
            completion_tokens,
            "collector run finished"
        );
        Ok(CollectOutcome {
            reply: result.final_text,
            iterations: result.iterations,
            transcript_len: transcript.len(),
        })
    }

    /// 角色切换到架构师并产出计划；计划无效时阶段保持 collecting
    pub async fn run_architect(&self, task_id: &str) -> Result<Plan, PipelineError> {
        let slot = self.slot(task_id).await?;
        let _running = slot.agent_lock.lock().await;
        let record = slot.record.lock().await.clone();
        if record.phase.current() != Phase::Collecting {
            return Err(not_allowed("run_architect", record.phase.current()));
        }

        let transcript = self.store.load_transcript(task_id).await?;
        let collected = BoundTranscript::new(transcript, self.collector.clone());
        let bound = switch_role(&collected, self.architect.clone());
        let result = self
            .runner(self.models.architect.clone(), &record)
            .run(bound, &architect_instruction(), &CancellationToken::new())
            .await?;

        if !result.written_paths.iter().any(|p| p == PLAN_PATH) {
            return Err(PipelineError::PlanValidation(format!(
                "architect finished without writing {PLAN_PATH}"
            )));
        }
        let raw = tokio::fs::read_to_string(record.workspace.join(PLAN_PATH)).await?;
        let plan = parse_architect_plan(&raw)?;
        let (prompt_tokens, completion_tokens, _) = self.models.architect.token_usage();
        tracing::info!(
            task_id,
            slides = plan.slides.len(),
            title = %plan.title,
            prompt_tokens,
            completion_tokens,
            "plan extracted"
        );

        self.store
            .save_transcript(task_id, result.transcript.transcript())
            .await?;
        self.store.save_plan(task_id, &plan).await?;
        slot.set_plan(Some(Arc::new(plan.clone())));

        let mut record = slot.record.lock().await;
        record.phase.transition(Phase::EditingPlan, &slot.guard(false))?;
        self.save_record(&mut record).await?;
        Ok(plan)
    }

    pub async fn get_plan(&self, task_id: &str) -> Result<Option<Plan>, PipelineError> {
        let slot = self.slot(task_id).await?;
        Ok(slot.plan().map(|p| (*p).clone()))
    }

    /// 人工保存计划（绕过模型）；在 collecting 中保存会进入 editing_plan
    pub async fn save_plan(&self, task_id: &str, mut plan: Plan) -> Result<Plan, PipelineError> {
        let slot = self.slot(task_id).await?;
        let mut record = slot.record.lock().await;
        let phase = record.phase.current();
        if !matches!(phase, Phase::Collecting | Phase::EditingPlan) {
            return Err(not_allowed("save_plan", phase));
        }

        let previous = slot.plan();
        match previous.as_deref() {
            Some(prev) => plan.validate_successor(prev)?,
            None => plan.validate()?,
        }
        plan.carry_high_water(previous.as_deref());

        self.store.save_plan(task_id, &plan).await?;
        write_json_atomic(&record.workspace.join(PLAN_PATH), &plan).await?;
        slot.set_plan(Some(Arc::new(plan.clone())));
        if phase == Phase::Collecting {
            record.phase.transition(Phase::EditingPlan, &slot.guard(false))?;
        }
        self.save_record(&mut record).await?;
        tracing::info!(task_id, slides = plan.slides.len(), "plan saved");
        Ok(plan)
    }

    /// editing_plan -> collecting，丢弃计划
    pub async fn discard_plan(&self, task_id: &str) -> Result<(), PipelineError> {
        let slot = self.slot(task_id).await?;
        let mut record = slot.record.lock().await;
        record.phase.transition(Phase::Collecting, &slot.guard(false))?;
        self.store.remove_plan(task_id).await?;
        slot.set_plan(None);
        self.save_record(&mut record).await
    }

    /// 进入 designing 并在后台启动批量生成；已在 designing 且无运行时继续未完成的条目
    pub async fn start_generation(&self, task_id: &str) -> Result<ManifestSummary, PipelineError> {
        let slot = self.slot(task_id).await?;
        let mut record = slot.record.lock().await;
        let phase = record.phase.current();
        if slot.busy() {
            return Err(not_allowed("start_generation (generation in progress)", phase));
        }
        match phase {
            Phase::EditingPlan => {
                record.phase.transition(Phase::Designing, &slot.guard(false))?;
            }
            Phase::Designing => {}
            other => {
                return Err(PipelineError::InvalidPhaseTransition {
                    from: other,
                    to: Phase::Designing,
                    reason: "generation starts from editing_plan".to_string(),
                })
            }
        }
        let plan = slot.plan().ok_or(PipelineError::InvalidPhaseTransition {
            from: phase,
            to: Phase::Designing,
            reason: "no validated plan".to_string(),
        })?;

        let previous = slot.manifest().map(|m| m.snapshot());
        let manifest = Arc::new(
            Manifest::expand(&plan, previous.as_ref()).with_store(self.store.manifest_path(task_id)?),
        );
        manifest.persist().await?;
        slot.set_manifest(Some(manifest.clone()));
        self.save_record(&mut record).await?;

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let engine = self.engine.clone();
        let workspace = record.workspace.clone();
        let run_manifest = manifest.clone();
        let run_cancel = cancel.clone();
        let id = task_id.to_string();
        let designer_llm = self.models.designer.clone();
        tokio::spawn(async move {
            let summary = engine
                .generate_all(plan, run_manifest, &workspace, &run_cancel)
                .await;
            let (prompt_tokens, completion_tokens, _) = designer_llm.token_usage();
            tracing::info!(
                task_id = %id,
                done = summary.done,
                failed = summary.failed,
                unsaved = summary.unsaved,
                prompt_tokens,
                completion_tokens,
                "bulk generation ended"
            );
            let _ = tx.send(Some(summary));
        });
        *slot.generation.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(GenerationHandle { cancel, done: rx });

        Ok(manifest.summary())
    }

    pub async fn get_progress(&self, task_id: &str) -> Result<ManifestSummary, PipelineError> {
        let slot = self.slot(task_id).await?;
        Ok(slot.manifest().map(|m| m.summary()).unwrap_or_default())
    }

    pub async fn get_manifest(&self, task_id: &str) -> Result<Vec<ManifestEntry>, PipelineError> {
        let slot = self.slot(task_id).await?;
        Ok(slot.manifest().map(|m| m.entries()).unwrap_or_default())
    }

    /// 取消该任务的批量生成与单张重生成：已完成保持，进行中记为 failed，未开始保持 pending
    pub async fn cancel_generation(&self, task_id: &str) -> Result<(), PipelineError> {
        let slot = self.slot(task_id).await?;
        slot.cancel_regenerations();
        if let Some(handle) = slot
            .generation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            tracing::info!(task_id, "cancelling generation");
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// 等待当前批量生成结束；没有运行时直接返回当前汇总
    pub async fn wait_for_generation(
        &self,
        task_id: &str,
    ) -> Result<ManifestSummary, PipelineError> {
        let slot = self.slot(task_id).await?;
        let rx = slot
            .generation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.done.clone());
        if let Some(mut rx) = rx {
            let finished = rx.wait_for(Option::is_some).await.map(|s| *s);
            if let Ok(Some(summary)) = finished {
                return Ok(summary);
            }
            tracing::warn!(task_id, "generation worker ended without a summary");
        }
        Ok(slot.manifest().map(|m| m.summary()).unwrap_or_default())
    }

    /// 单张重生成；批量运行占用中或已在重生成的条目返回 SlideBusy。
    /// 检查与占位都在任务记录锁内完成，与 start_generation / return_to_plan_editing 互斥
    pub async fn regenerate_slide(
        &self,
        task_id: &str,
        slide: SlideId,
        feedback: Option<String>,
    ) -> Result<ManifestEntry, PipelineError> {
        let slot = self.slot(task_id).await?;
        let (plan, manifest, workspace, cancel, _claim) = {
            let record = slot.record.lock().await;
            let phase = record.phase.current();
            if !matches!(phase, Phase::Designing | Phase::Completed) {
                return Err(not_allowed("regenerate_slide", phase));
            }
            let (Some(plan), Some(manifest)) = (slot.plan(), slot.manifest()) else {
                return Err(not_allowed("regenerate_slide", phase));
            };
            let entry = manifest.entry(slide)?;
            let busy = match entry.status {
                SlideStatus::Running => true,
                SlideStatus::Pending => slot.generation_active(),
                SlideStatus::Done | SlideStatus::Failed => false,
            };
            if busy {
                return Err(PipelineError::SlideBusy {
                    slide,
                    status: entry.status.to_string(),
                });
            }
            let claim = slot.claim(slide, entry.status)?;
            (plan, manifest, record.workspace.clone(), slot.regen_token(), claim)
        };

        tracing::info!(task_id, slide_id = %slide, with_feedback = feedback.is_some(), "regenerating slide");
        let result = self
            .engine
            .regenerate(plan, manifest, slide, feedback, &workspace, &cancel)
            .await;
        self.save_record(&mut *slot.record.lock().await).await?;
        result
    }

    /// 读取已完成幻灯片的产物
    pub async fn get_slide_artifact(
        &self,
        task_id: &str,
        slide: SlideId,
    ) -> Result<String, PipelineError> {
        let slot = self.slot(task_id).await?;
        let manifest = slot
            .manifest()
            .ok_or(PipelineError::SlideNotFound(slide))?;
        let entry = manifest.entry(slide)?;
        if entry.status != SlideStatus::Done {
            return Err(PipelineError::SlideBusy {
                slide,
                status: entry.status.to_string(),
            });
        }
        let workspace = slot.record.lock().await.workspace.clone();
        Ok(tokio::fs::read_to_string(workspace.join(&entry.artifact_path)).await?)
    }

    /// designing -> editing_plan：作废清单，保留计划
    pub async fn return_to_plan_editing(&self, task_id: &str) -> Result<(), PipelineError> {
        let slot = self.slot(task_id).await?;
        let mut record = slot.record.lock().await;
        if slot.busy() {
            return Err(PipelineError::InvalidPhaseTransition {
                from: record.phase.current(),
                to: Phase::EditingPlan,
                reason: "generation still running".to_string(),
            });
        }
        record.phase.transition(Phase::EditingPlan, &slot.guard(false))?;
        self.store.remove_manifest(task_id).await?;
        slot.set_manifest(None);
        *slot.generation.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.save_record(&mut record).await
    }

    /// designing -> completed；存在失败条目时需要显式确认
    pub async fn complete_task(
        &self,
        task_id: &str,
        acknowledge_failures: bool,
    ) -> Result<TaskRecord, PipelineError> {
        let slot = self.slot(task_id).await?;
        let mut record = slot.record.lock().await;
        record
            .phase
            .transition(Phase::Completed, &slot.guard(acknowledge_failures))?;
        self.save_record(&mut record).await?;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn cfg(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.tasks_dir = dir.join("tasks");
        cfg
    }

    async fn pipeline(dir: &std::path::Path, llm: Arc<dyn LlmClient>) -> Pipeline {
        Pipeline::with_components(cfg(dir), RoleModels::shared(llm), None)
            .await
            .unwrap()
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut llm = LlmSection::default();
        llm.provider = "carrier-pigeon".into();
        assert!(matches!(
            create_llm_for_role(&llm, RoleKind::Collector),
            Err(PipelineError::Config(_))
        ));
        llm.provider = "mock".into();
        assert!(create_llm_for_role(&llm, RoleKind::Designer).is_ok());
    }

    #[tokio::test]
    async fn test_failed_collect_leaves_transcript_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok("Looked around.".into()),
            Err(crate::llm::LlmError::Request("down".into())),
        ]));
        let p = pipeline(dir.path(), llm).await;
        let task = p.create_task("deck", None).await.unwrap();

        let first = p.start_collecting(&task.id, "hello").await.unwrap();
        assert_eq!(first.transcript_len, 2);
        let err = p.start_collecting(&task.id, "again").await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
        assert_eq!(p.store().load_transcript(&task.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_requires_plan() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(MockLlmClient::default())).await;
        let task = p.create_task("deck", None).await.unwrap();
        let err = p.start_generation(&task.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPhaseTransition { .. }));
        assert_eq!(p.get_task(&task.id).await.unwrap().phase.current(), Phase::Collecting);
    }

    #[tokio::test]
    async fn test_manual_plan_save_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(MockLlmClient::default())).await;
        let task = p.create_task("deck", None).await.unwrap();

        let mut plan = Plan::new("Deck", None, Vec::new());
        plan.add_slide("Intro", "Agenda");
        plan.add_slide("Close", "Thanks");
        p.save_plan(&task.id, plan).await.unwrap();
        assert_eq!(p.get_task(&task.id).await.unwrap().phase.current(), Phase::EditingPlan);
        assert!(task.workspace.join(PLAN_PATH).exists());

        p.discard_plan(&task.id).await.unwrap();
        assert!(p.get_plan(&task.id).await.unwrap().is_none());
        assert_eq!(p.get_task(&task.id).await.unwrap().phase.current(), Phase::Collecting);
    }

    #[tokio::test]
    async fn test_slide_claim_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(MockLlmClient::default())).await;
        let task = p.create_task("deck", None).await.unwrap();
        let slot = p.slot(&task.id).await.unwrap();

        let claim = slot.claim(SlideId::new(1), SlideStatus::Pending).unwrap();
        assert!(slot.busy());
        assert!(slot.guard(true).generation_active);
        assert!(matches!(
            slot.claim(SlideId::new(1), SlideStatus::Pending),
            Err(PipelineError::SlideBusy { .. })
        ));
        let other = slot.claim(SlideId::new(2), SlideStatus::Done).unwrap();

        drop(claim);
        drop(other);
        assert!(!slot.busy());
        assert!(slot.claim(SlideId::new(1), SlideStatus::Done).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_replaces_regeneration_token() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(MockLlmClient::default())).await;
        let task = p.create_task("deck", None).await.unwrap();
        let slot = p.slot(&task.id).await.unwrap();

        let running = slot.regen_token();
        p.cancel_generation(&task.id).await.unwrap();
        assert!(running.is_cancelled());
        assert!(!slot.regen_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(MockLlmClient::default())).await;
        assert!(matches!(
            p.get_task("nope").await,
            Err(PipelineError::TaskNotFound(_))
        ));
    }
}
