//! 准入闸门：限制同时进行的设计师运行数
//!
//! 上限为 0 时不限；否则用 Semaphore 发放许可，许可随 AdmissionPermit 析构归还。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::PipelineError;

/// 全局准入闸门（克隆后共享同一组许可）
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    semaphore: Option<Arc<Semaphore>>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
}

/// 持有期间计为一个在途运行
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        Self {
            semaphore,
            limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// 配置的上限；None 表示不限
    pub fn limit(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 等待许可；闸门关闭视为取消
    pub async fn admit(&self) -> Result<AdmissionPermit, PipelineError> {
        let permit = match &self.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled)?,
            ),
            None => None,
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(3)
    }
}
