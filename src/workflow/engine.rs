//! 幻灯片生成引擎
//!
//! 对清单中尚未 done 的条目各起一个独立工作者：过准入闸门 -> 设计尝试 -> 失败则指数退避重试，
//! 预算用尽记为 failed。单张失败不影响兄弟条目，批量调用总是返回汇总而不是报错。
//! 取消时：未准入的保持 pending，进行中的在下一个挂起点放弃并记为 failed。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationSection;
use crate::core::{AdmissionGate, PipelineError, RecoveryEngine, RetryPolicy};
use crate::workflow::{
    DesignRequest, Manifest, ManifestEntry, ManifestSummary, Plan, SlideDesigner, SlideId,
    SlideStatus,
};

/// 全局唯一的生成引擎；闸门跨任务共享
pub struct SlideGenerationEngine {
    designer: Arc<dyn SlideDesigner>,
    gate: AdmissionGate,
    retry: RetryPolicy,
    slide_timeout: Option<Duration>,
    recovery: RecoveryEngine,
}

impl SlideGenerationEngine {
    pub fn new(designer: Arc<dyn SlideDesigner>, gate: AdmissionGate, retry: RetryPolicy) -> Self {
        Self {
            designer,
            gate,
            retry,
            slide_timeout: None,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn from_config(designer: Arc<dyn SlideDesigner>, cfg: &GenerationSection) -> Self {
        Self::new(
            designer,
            AdmissionGate::new(cfg.max_concurrent_slides),
            cfg.retry_policy(),
        )
        .with_slide_timeout(cfg.slide_timeout())
    }

    /// 单次尝试的时限；None 不限
    pub fn with_slide_timeout(mut self, limit: Option<Duration>) -> Self {
        self.slide_timeout = limit;
        self
    }

    /// 批量生成所有未完成条目，等全部工作者结束后返回汇总
    pub async fn generate_all(
        &self,
        plan: Arc<Plan>,
        manifest: Arc<Manifest>,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> ManifestSummary {
        let outstanding = manifest.outstanding();
        tracing::info!(
            title = %plan.title,
            slides = outstanding.len(),
            limit = ?self.gate.limit(),
            "generation started"
        );

        let workers = outstanding.into_iter().map(|id| {
            let plan = plan.clone();
            let manifest = manifest.clone();
            async move {
                if let Err(e) = self
                    .run_slide(plan, &manifest, workspace, id, None, cancel)
                    .await
                {
                    tracing::debug!(slide_id = %id, error = %e, "slide worker ended without artifact");
                }
            }
        });
        join_all(workers).await;

        let summary = manifest.summary();
        tracing::info!(
            done = summary.done,
            failed = summary.failed,
            pending = summary.pending,
            "generation finished"
        );
        summary
    }

    /// 单张重新生成（可带反馈），与批量共用闸门与重试策略；条目被替换而非新增。
    /// 条目正在运行时返回 SlideBusy，检查与重置在同一次条目加锁内完成
    pub async fn regenerate(
        &self,
        plan: Arc<Plan>,
        manifest: Arc<Manifest>,
        id: SlideId,
        feedback: Option<String>,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<ManifestEntry, PipelineError> {
        if plan.slide(id).is_none() {
            return Err(PipelineError::SlideNotFound(id));
        }
        let mut busy = false;
        manifest.update(id, |e| {
            if e.status == SlideStatus::Running {
                busy = true;
            } else {
                e.status = SlideStatus::Pending;
            }
        })?;
        if busy {
            return Err(PipelineError::SlideBusy {
                slide: id,
                status: SlideStatus::Running.to_string(),
            });
        }
        self.save(&manifest).await;
        self.run_slide(plan, &manifest, workspace, id, feedback, cancel)
            .await
    }

    async fn run_slide(
        &self,
        plan: Arc<Plan>,
        manifest: &Manifest,
        workspace: &Path,
        id: SlideId,
        feedback: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ManifestEntry, PipelineError> {
        let Some(spec) = plan.slide(id).cloned() else {
            manifest.update(id, |e| e.mark_failed("slide missing from plan"))?;
            self.save(manifest).await;
            return Err(PipelineError::SlideNotFound(id));
        };

        // 取消先于准入：未开始的条目保持 pending
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            permit = self.gate.admit() => permit?,
        };

        let mut attempt = 0u32;
        loop {
            let entry = manifest.update(id, |e| e.mark_running())?;
            self.save(manifest).await;
            tracing::info!(slide_id = %id, attempt = entry.attempts, "designing slide");

            let request = DesignRequest {
                workspace: PathBuf::from(workspace),
                plan: plan.clone(),
                slide: spec.clone(),
                artifact_path: entry.artifact_path.clone(),
                feedback: feedback.clone(),
            };
            let err = match self.attempt(request, cancel).await {
                Ok(()) => {
                    let done = manifest.update(id, |e| e.mark_done())?;
                    self.save(manifest).await;
                    tracing::info!(slide_id = %id, attempts = done.attempts, "slide done");
                    return Ok(done);
                }
                Err(e) => e,
            };

            if matches!(err, PipelineError::Cancelled) {
                return self.abandon(manifest, id).await;
            }
            if !self.recovery.is_retryable(&err) || attempt >= self.retry.max_retries {
                let reason = err.to_string();
                manifest.update(id, |e| e.mark_failed(reason.clone()))?;
                self.save(manifest).await;
                tracing::warn!(slide_id = %id, attempts = attempt + 1, error = %reason, "slide failed");
                return Err(PipelineError::SlideGenerationFailed { slide: id, reason });
            }

            let delay = self.retry.delay_for(attempt);
            manifest.update(id, |e| e.last_error = Some(err.to_string()))?;
            tracing::warn!(
                slide_id = %id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "slide attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(manifest, id).await,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        request: DesignRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let slide = request.slide.id;
        let design = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                r = self.designer.design(request, cancel) => r,
            }
        };
        match self.slide_timeout {
            Some(limit) => tokio::time::timeout(limit, design)
                .await
                .unwrap_or_else(|_| {
                    Err(PipelineError::SlideGenerationFailed {
                        slide,
                        reason: format!("attempt timed out after {}s", limit.as_secs()),
                    })
                }),
            None => design.await,
        }
    }

    /// 进行中被取消：记为 failed，不会悄悄丢失
    async fn abandon(&self, manifest: &Manifest, id: SlideId) -> Result<ManifestEntry, PipelineError> {
        manifest.update(id, |e| e.mark_failed("cancelled"))?;
        self.save(manifest).await;
        tracing::info!(slide_id = %id, "slide abandoned on cancellation");
        Err(PipelineError::Cancelled)
    }

    /// 落盘失败不中断工作者；失败状态由 summary().unsaved 带给调用方
    async fn save(&self, manifest: &Manifest) {
        if let Err(e) = manifest.persist().await {
            tracing::error!(error = %e, "failed to persist manifest, progress is not on disk");
        }
    }
}
