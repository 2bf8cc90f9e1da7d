//! The generative-agent contract consumed by the Bridge.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent call cancelled")]
    Cancelled,
    #[error("agent error: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Thread identity passed to the agent so it can maintain per-conversation
/// memory across calls.
#[derive(Debug, Clone)]
pub struct ThreadMeta {
    pub thread_id: String,
    pub thread_title: String,
    /// Free-form metadata describing the thread (phone, group id, etc.).
    pub fields: Value,
}

/// The agent runtime contract: given a thread identity, a content string
/// and a cancellation token, produce a text reply or an error. Cancellation
/// must be honoured promptly and reported as [`AgentError::Cancelled`].
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn generate(&self, thread: ThreadMeta, content: String, cancel: CancellationToken) -> Result<String>;
}
