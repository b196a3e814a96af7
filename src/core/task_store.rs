//! 任务持久化
//!
//! 每个任务一个目录 `task_<id>/`：task_state.json、transcript.json、plan.json、manifest.json 与默认工作区 workspace/。
//! 各文件独立读写，重启后据此恢复阶段、计划与清单。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{PhaseState, PipelineError};
use crate::memory::{read_json, write_json_atomic, Transcript};
use crate::workflow::{ManifestSnapshot, Plan};

const STATE_FILE: &str = "task_state.json";
const TRANSCRIPT_FILE: &str = "transcript.json";
const PLAN_FILE: &str = "plan.json";
const MANIFEST_FILE: &str = "manifest.json";

/// 任务元数据与阶段
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub phase: PhaseState,
    pub workspace: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// 基于目录的任务存储
#[derive(Clone, Debug)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// id 只允许字母数字、`-`、`_`，防止拼出根目录之外的路径
    pub fn task_dir(&self, id: &str) -> Result<PathBuf, PipelineError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::TaskNotFound(id.to_string()));
        }
        Ok(self.root.join(format!("task_{id}")))
    }

    /// 新建任务；未指定工作区时使用任务目录下的 workspace/
    pub async fn create(
        &self,
        name: &str,
        workspace: Option<PathBuf>,
    ) -> Result<TaskRecord, PipelineError> {
        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let dir = self.task_dir(&id)?;
        let workspace = workspace.unwrap_or_else(|| dir.join("workspace"));
        tokio::fs::create_dir_all(&workspace).await?;
        let now = Utc::now();
        let record = TaskRecord {
            id,
            name: name.to_string(),
            phase: PhaseState::new(),
            workspace,
            created_at: now,
            updated_at: now,
        };
        self.save_record(&record).await?;
        tracing::info!(task_id = %record.id, name = %record.name, "task created");
        Ok(record)
    }

    pub async fn save_record(&self, record: &TaskRecord) -> Result<(), PipelineError> {
        write_json_atomic(&self.task_dir(&record.id)?.join(STATE_FILE), record).await
    }

    pub async fn load_record(&self, id: &str) -> Result<TaskRecord, PipelineError> {
        read_json(&self.task_dir(id)?.join(STATE_FILE))
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound(id.to_string()))
    }

    /// 全部任务，最近更新的在前；损坏的任务目录跳过并告警
    pub async fn load_all(&self) -> Result<Vec<TaskRecord>, PipelineError> {
        let mut records = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_prefix("task_") else {
                continue;
            };
            match self.load_record(id).await {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(task_dir = %name, error = %e, "skipping unreadable task"),
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    pub async fn save_transcript(
        &self,
        id: &str,
        transcript: &Transcript,
    ) -> Result<(), PipelineError> {
        write_json_atomic(&self.task_dir(id)?.join(TRANSCRIPT_FILE), transcript).await
    }

    /// 读取并校验调用/结果顺序；不存在时为空记录
    pub async fn load_transcript(&self, id: &str) -> Result<Transcript, PipelineError> {
        let transcript: Transcript = read_json(&self.task_dir(id)?.join(TRANSCRIPT_FILE))
            .await?
            .unwrap_or_default();
        transcript.validate()?;
        Ok(transcript)
    }

    pub async fn save_plan(&self, id: &str, plan: &Plan) -> Result<(), PipelineError> {
        write_json_atomic(&self.task_dir(id)?.join(PLAN_FILE), plan).await
    }

    pub async fn load_plan(&self, id: &str) -> Result<Option<Plan>, PipelineError> {
        read_json(&self.task_dir(id)?.join(PLAN_FILE)).await
    }

    pub async fn remove_plan(&self, id: &str) -> Result<(), PipelineError> {
        remove_if_exists(&self.task_dir(id)?.join(PLAN_FILE)).await
    }

    pub fn manifest_path(&self, id: &str) -> Result<PathBuf, PipelineError> {
        Ok(self.task_dir(id)?.join(MANIFEST_FILE))
    }

    pub async fn load_manifest(&self, id: &str) -> Result<Option<ManifestSnapshot>, PipelineError> {
        read_json(&self.manifest_path(id)?).await
    }

    pub async fn remove_manifest(&self, id: &str) -> Result<(), PipelineError> {
        remove_if_exists(&self.manifest_path(id)?).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
