// SPDX-License-Identifier: MIT

//! Agent module - the capability interface every backend implements
//!
//! The orchestrator only ever talks to backends through the [`Agent`] trait:
//! - `execute` - blocking call returning the complete response
//! - `execute_stream` - ordered [`StreamChunk`]s pushed into a bounded queue
//!
//! Built-in implementations:
//! - `EchoAgent` - repeats the prompt back, used for dry runs and demos

mod echo;

pub use echo::EchoAgent;

use crate::adk::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Kind of a streamed fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Status,
    Thinking,
    Output,
    Error,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Status => "status",
            ChunkKind::Thinking => "thinking",
            ChunkKind::Output => "output",
            ChunkKind::Error => "error",
        }
    }
}

/// One fragment of a streamed agent response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub kind: ChunkKind,
    /// Set on the backend's own last fragment
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            done: false,
        }
    }

    pub fn output(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Output, content)
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Status, content)
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Thinking, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Error, content)
    }

    /// Mark this fragment as the backend's terminal one
    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Complete result of an agent call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u32,
}

/// Core agent trait for all backends
///
/// `execute_stream` receives the sending half of the relay queue by value.
/// The queue closes when the sender is dropped, which happens exactly once,
/// when the call returns, whether it succeeded or not.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name (the routing key)
    fn name(&self) -> &str;

    /// Returns the backend model identifier
    fn model(&self) -> &str;

    /// Current status string ("ready", "processing", ...)
    fn status(&self) -> String {
        "ready".to_string()
    }

    /// Run the prompt to completion
    async fn execute(
        &self,
        prompt: String,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError>;

    /// Run the prompt, pushing fragments into `tx` as they are produced
    async fn execute_stream(
        &self,
        prompt: String,
        cancel: CancellationToken,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<AgentResponse, AgentError> {
        // Default implementation falls back to execute()
        match self.execute(prompt, cancel).await {
            Ok(res) => {
                let _ = tx.send(StreamChunk::output(res.content.clone())).await;
                Ok(res)
            }
            Err(e) => {
                let _ = tx.send(StreamChunk::error(e.to_string()).finished()).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple mock agent that transforms input (used in tests)
    pub struct MockAgent {
        name: String,
        transform: fn(String) -> String,
    }

    impl MockAgent {
        pub fn new(name: &str, transform: fn(String) -> String) -> Self {
            Self {
                name: name.to_string(),
                transform,
            }
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "mock"
        }

        async fn execute(
            &self,
            prompt: String,
            _cancel: CancellationToken,
        ) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse {
                content: (self.transform)(prompt),
                model: "mock".to_string(),
                tokens_used: 0,
            })
        }
    }

    struct BrokenAgent;

    #[async_trait]
    impl Agent for BrokenAgent {
        fn name(&self) -> &str {
            "broken"
        }

        fn model(&self) -> &str {
            "none"
        }

        async fn execute(
            &self,
            _prompt: String,
            _cancel: CancellationToken,
        ) -> Result<AgentResponse, AgentError> {
            Err(AgentError::failed("broken", "exit status 1"))
        }
    }

    #[tokio::test]
    async fn test_mock_agent() {
        let agent = MockAgent::new("test", |s| format!("{}-transformed", s));
        assert_eq!(agent.name(), "test");
        assert_eq!(agent.status(), "ready");

        let result = agent
            .execute("input".to_string(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.content, "input-transformed");
    }

    #[tokio::test]
    async fn test_default_stream_sends_output_then_closes() {
        let agent = MockAgent::new("test", |s| s.to_uppercase());
        let (tx, mut rx) = mpsc::channel(4);

        let res = agent
            .execute_stream("abc".to_string(), CancellationToken::new(), tx)
            .await
            .unwrap();
        assert_eq!(res.content, "ABC");

        assert_eq!(rx.recv().await, Some(StreamChunk::output("ABC")));
        // Sender was consumed by the call, so the queue is closed now
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_default_stream_reports_error_chunk() {
        let (tx, mut rx) = mpsc::channel(4);
        let err = BrokenAgent
            .execute_stream("x".to_string(), CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit status 1"));

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.kind, ChunkKind::Error);
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_chunk_kind_serde() {
        let json = serde_json::to_string(&ChunkKind::Thinking).unwrap();
        assert_eq!(json, "\"thinking\"");
        assert_eq!(ChunkKind::Output.as_str(), "output");
    }
}
