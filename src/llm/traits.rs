//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 脚本化）实现 LlmClient::complete；
//! RetryingLlmClient 在端点层做有限次退避重试，耗尽后由 Agent 循环映射为 ModelUnavailable。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::RetryPolicy;
use crate::memory::Message;

/// 模型端点错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("empty response")]
    EmptyResponse,

    #[error("client misconfigured: {0}")]
    Config(String),
}

impl LlmError {
    /// 配置错误重试无意义
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::Config(_))
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型名（日志用）
    fn model(&self) -> &str {
        "unknown"
    }

    /// 累计 token 使用：(prompt_tokens, completion_tokens, total_tokens)；不计量的后端返回全 0
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 端点级重试包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(model = %self.inner.model(), attempt, error = %e, "llm request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
