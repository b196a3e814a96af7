//! Mock LLM 客户端（用于测试，无需 API）
//!
//! - ScriptedLlmClient：按顺序吐出预置回复，并记录每次收到的消息
//! - MockLlmClient：由闭包根据消息生成回复，适合并发的设计师运行

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, MessageRole};

/// 脚本化客户端：回复队列耗尽后返回 Request 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 便捷构造：全部为成功回复
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次请求收到的完整消息序列
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| LlmError::Request("script lock poisoned".into()))?
            .pop_front();
        next.unwrap_or_else(|| Err(LlmError::Request("script exhausted".into())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

type Responder = dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync;

/// 闭包驱动的 Mock；默认回显最后一条用户消息（无工具调用，即隐式完成）
pub struct MockLlmClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(|messages| {
            let last_user = last_user_message(messages).unwrap_or("(no input)");
            Ok(format!("Echo from Mock: {last_user}"))
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(messages)
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// 取最后一条 user 消息的内容
pub fn last_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
}
