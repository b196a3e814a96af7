//! 生成清单：每张幻灯片一个条目，记录状态、尝试次数与产物路径
//!
//! 条目按计划顺序一次性创建，之后只更新不增删。每个条目各自一把锁，
//! 工作者只写自己的条目；落盘时取快照整体原子替换。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::PipelineError;
use crate::memory::write_json_atomic;
use crate::workflow::{Plan, SlideId};

/// 条目状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl SlideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlideStatus::Pending => "pending",
            SlideStatus::Running => "running",
            SlideStatus::Done => "done",
            SlideStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SlideStatus::Done | SlideStatus::Failed)
    }
}

impl std::fmt::Display for SlideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub slide_id: SlideId,
    pub title: String,
    pub status: SlideStatus,
    pub attempts: u32,
    pub artifact_path: String,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ManifestEntry {
    pub fn pending(slide_id: SlideId, title: impl Into<String>) -> Self {
        Self {
            slide_id,
            title: title.into(),
            status: SlideStatus::Pending,
            attempts: 0,
            artifact_path: slide_id.artifact_path(),
            last_updated: None,
            last_error: None,
        }
    }

    /// 一次设计尝试开始
    pub fn mark_running(&mut self) {
        self.status = SlideStatus::Running;
        self.attempts += 1;
        self.last_updated = Some(Utc::now());
    }

    pub fn mark_done(&mut self) {
        self.status = SlideStatus::Done;
        self.last_error = None;
        self.last_updated = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = SlideStatus::Failed;
        self.last_error = Some(reason.into());
        self.last_updated = Some(Utc::now());
    }
}

/// 各状态计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    /// 最近一次落盘失败：磁盘上的清单落后于内存状态
    #[serde(default)]
    pub unsaved: bool,
}

impl ManifestSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ManifestEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.total += 1;
            match entry.status {
                SlideStatus::Pending => summary.pending += 1,
                SlideStatus::Running => summary.running += 1,
                SlideStatus::Done => summary.done += 1,
                SlideStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// pending + running
    pub fn unfinished(&self) -> usize {
        self.pending + self.running
    }
}

/// 持久化形式（manifest.json）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl ManifestSnapshot {
    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary::from_entries(&self.entries)
    }
}

/// 运行期清单
#[derive(Debug)]
pub struct Manifest {
    title: String,
    created_at: DateTime<Utc>,
    slots: Vec<(SlideId, Mutex<ManifestEntry>)>,
    store_path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
    unsaved: AtomicBool,
}

impl Manifest {
    /// 由计划展开；上一版中已 done 的条目原样保留，其余重置为 pending（保留尝试次数）
    pub fn expand(plan: &Plan, previous: Option<&ManifestSnapshot>) -> Self {
        let slots = plan
            .slides
            .iter()
            .map(|spec| {
                let carried = previous
                    .and_then(|p| p.entries.iter().find(|e| e.slide_id == spec.id));
                let entry = match carried {
                    Some(e) if e.status == SlideStatus::Done => ManifestEntry {
                        title: spec.title.clone(),
                        ..e.clone()
                    },
                    Some(e) => ManifestEntry {
                        attempts: e.attempts,
                        ..ManifestEntry::pending(spec.id, spec.title.clone())
                    },
                    None => ManifestEntry::pending(spec.id, spec.title.clone()),
                };
                (spec.id, Mutex::new(entry))
            })
            .collect();
        Self {
            title: plan.title.clone(),
            created_at: previous.map(|p| p.created_at).unwrap_or_else(Utc::now),
            slots,
            store_path: None,
            write_lock: tokio::sync::Mutex::new(()),
            unsaved: AtomicBool::new(false),
        }
    }

    /// 从落盘快照恢复；仍为 running 的条目说明进程中断，记为失败
    pub fn from_snapshot(snapshot: ManifestSnapshot) -> Self {
        let slots = snapshot
            .entries
            .into_iter()
            .map(|mut entry| {
                if entry.status == SlideStatus::Running {
                    entry.mark_failed("interrupted");
                }
                (entry.slide_id, Mutex::new(entry))
            })
            .collect();
        Self {
            title: snapshot.title,
            created_at: snapshot.created_at,
            slots,
            store_path: None,
            write_lock: tokio::sync::Mutex::new(()),
            unsaved: AtomicBool::new(false),
        }
    }

    /// 每次更新后落盘到该路径
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> Vec<SlideId> {
        self.slots.iter().map(|(id, _)| *id).collect()
    }

    fn slot(&self, id: SlideId) -> Result<&Mutex<ManifestEntry>, PipelineError> {
        self.slots
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, m)| m)
            .ok_or(PipelineError::SlideNotFound(id))
    }

    pub fn entry(&self, id: SlideId) -> Result<ManifestEntry, PipelineError> {
        let slot = self.slot(id)?;
        let entry = slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entry.clone())
    }

    /// 在条目锁内修改并返回修改后的副本
    pub fn update<F>(&self, id: SlideId, f: F) -> Result<ManifestEntry, PipelineError>
    where
        F: FnOnce(&mut ManifestEntry),
    {
        let slot = self.slot(id)?;
        let mut entry = slot.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut entry);
        Ok(entry.clone())
    }

    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.slots
            .iter()
            .map(|(_, m)| m.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            unsaved: self.unsaved.load(Ordering::SeqCst),
            ..ManifestSummary::from_entries(&self.entries())
        }
    }

    /// 尚未 done 的条目（计划顺序）
    pub fn outstanding(&self) -> Vec<SlideId> {
        self.entries()
            .into_iter()
            .filter(|e| e.status != SlideStatus::Done)
            .map(|e| e.slide_id)
            .collect()
    }

    pub fn snapshot(&self) -> ManifestSnapshot {
        ManifestSnapshot {
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            entries: self.entries(),
        }
    }

    /// 原子落盘；写入串行化，快照在写锁内获取，后写者总是更新的状态。
    /// 失败会记在 summary().unsaved 上，直到下一次成功写入
    pub async fn persist(&self) -> Result<(), PipelineError> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let snapshot = self.snapshot();
        let result = write_json_atomic(path, &snapshot).await;
        self.unsaved.store(result.is_err(), Ordering::SeqCst);
        result
    }
}
