//! 核心编排层：错误与恢复、阶段状态机、重试退避、准入闸门、任务存储与流水线

pub mod backoff;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod recovery;
pub mod task_scheduler;
pub mod task_store;

pub use backoff::RetryPolicy;
pub use error::{PipelineError, RecoveryAction};
pub use orchestrator::{create_llm_for_role, CollectOutcome, Pipeline, RoleModels};
pub use phase::{Phase, PhaseRecord, PhaseState, TransitionGuard};
pub use recovery::RecoveryEngine;
pub use task_scheduler::{AdmissionGate, AdmissionPermit};
pub use task_store::{TaskRecord, TaskStore};
