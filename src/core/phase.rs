//! 任务阶段状态机
//!
//! collecting → editing_plan → designing → completed；
//! 仅允许两条回退边：editing_plan → collecting（丢弃计划）与 designing → editing_plan（作废清单、保留计划）。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;

/// 任务阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collecting,
    EditingPlan,
    Designing,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Collecting => "collecting",
            Phase::EditingPlan => "editing_plan",
            Phase::Designing => "designing",
            Phase::Completed => "completed",
        }
    }

    /// 状态图中的边（不含守卫条件）
    pub fn can_transition_to(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Collecting, Phase::EditingPlan)
                | (Phase::EditingPlan, Phase::Designing)
                | (Phase::Designing, Phase::Completed)
                | (Phase::EditingPlan, Phase::Collecting)
                | (Phase::Designing, Phase::EditingPlan)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 迁移守卫所需的任务事实，由编排器在迁移前汇总
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionGuard {
    pub has_plan: bool,
    pub generation_active: bool,
    /// 仍为 pending / running 的条目数
    pub unfinished: usize,
    pub failed: usize,
    pub acknowledge_failures: bool,
}

/// 已退出阶段的记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
}

/// 当前阶段与历史
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseState {
    current: Phase,
    entered_at: DateTime<Utc>,
    #[serde(default)]
    history: Vec<PhaseRecord>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self {
            current: Phase::Collecting,
            entered_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    /// 校验迁移（边 + 守卫），不修改状态
    pub fn check(&self, to: Phase, guard: &TransitionGuard) -> Result<(), PipelineError> {
        let from = self.current;
        let reject = |reason: &str| PipelineError::InvalidPhaseTransition {
            from,
            to,
            reason: reason.to_string(),
        };

        if !from.can_transition_to(to) {
            return Err(reject("no such edge"));
        }
        match to {
            Phase::EditingPlan | Phase::Designing if !guard.has_plan => {
                Err(reject("no validated plan"))
            }
            Phase::Completed if guard.generation_active => Err(reject("generation still running")),
            Phase::Completed if guard.unfinished > 0 => Err(reject(&format!(
                "{} slide(s) not in a terminal state",
                guard.unfinished
            ))),
            Phase::Completed if guard.failed > 0 && !guard.acknowledge_failures => {
                Err(reject(&format!(
                    "{} slide(s) failed; completion requires acknowledgement",
                    guard.failed
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn transition(&mut self, to: Phase, guard: &TransitionGuard) -> Result<(), PipelineError> {
        self.check(to, guard)?;
        let now = Utc::now();
        self.history.push(PhaseRecord {
            phase: self.current,
            entered_at: self.entered_at,
            exited_at: now,
        });
        tracing::info!(from = %self.current, to = %to, "phase transition");
        self.current = to;
        self.entered_at = now;
        Ok(())
    }
}
