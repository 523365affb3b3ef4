//! Echo Agent - offline backend that repeats the prompt
//!
//! Useful for dry runs of workflows and for wiring checks: it honours the
//! cancellation signal, reports `processing` while busy and streams the
//! prompt back word by word.

use super::{Agent, AgentResponse, StreamChunk};
use crate::adk::error::AgentError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Agent that answers with its prompt, optionally prefixed
pub struct EchoAgent {
    name: String,
    model: String,
    prefix: String,
    /// Pause between streamed words
    delay: Duration,
    /// Calls currently in flight
    in_flight: AtomicUsize,
}

impl EchoAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "echo".to_string(),
            prefix: String::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn reply(&self, prompt: &str) -> String {
        format!("{}{}", self.prefix, prompt)
    }

    fn response(&self, content: String) -> AgentResponse {
        let tokens_used = content.split_whitespace().count() as u32;
        AgentResponse {
            content,
            model: self.model.clone(),
            tokens_used,
        }
    }
}

/// Counts a call as in flight until it ends, however it ends
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn status(&self) -> String {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            "processing".to_string()
        } else {
            "ready".to_string()
        }
    }

    async fn execute(
        &self,
        prompt: String,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let _busy = BusyGuard::enter(&self.in_flight);
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled(self.name.clone()));
        }
        Ok(self.response(self.reply(&prompt)))
    }

    async fn execute_stream(
        &self,
        prompt: String,
        cancel: CancellationToken,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<AgentResponse, AgentError> {
        let _busy = BusyGuard::enter(&self.in_flight);
        let _ = tx
            .send(StreamChunk::status(format!("Starting {}...", self.name)))
            .await;

        let reply = self.reply(&prompt);
        let mut emitted = String::new();
        for (i, word) in reply.split_inclusive(' ').enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            if cancel.is_cancelled() {
                let _ = tx.send(StreamChunk::status("Cancelled").finished()).await;
                return Err(AgentError::Cancelled(self.name.clone()));
            }
            emitted.push_str(word);
            if tx.send(StreamChunk::output(word)).await.is_err() {
                log::debug!("Agent {} stream receiver dropped", self.name);
                break;
            }
        }

        let _ = tx.send(StreamChunk::status("Done").finished()).await;
        Ok(self.response(emitted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::agent::ChunkKind;

    #[tokio::test]
    async fn test_execute_echoes_with_prefix() {
        let agent = EchoAgent::new("echo").with_prefix("echo: ");
        let res = agent
            .execute("hello there".to_string(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res.content, "echo: hello there");
        assert_eq!(res.model, "echo");
        assert_eq!(res.tokens_used, 3);
        assert_eq!(agent.status(), "ready");
    }

    #[tokio::test]
    async fn test_stream_emits_words_in_order() {
        let agent = EchoAgent::new("echo");
        let (tx, mut rx) = mpsc::channel(16);
        let res = agent
            .execute_stream("a b c".to_string(), CancellationToken::new(), tx)
            .await
            .unwrap();
        assert_eq!(res.content, "a b c");

        let mut outputs = Vec::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            if chunk.kind == ChunkKind::Output {
                outputs.push(chunk.content.clone());
            }
            last = Some(chunk);
        }
        assert_eq!(outputs, vec!["a ", "b ", "c"]);
        assert!(last.unwrap().done);
    }

    #[tokio::test]
    async fn test_status_stays_processing_while_any_call_runs() {
        let agent = std::sync::Arc::new(EchoAgent::new("echo"));

        // Nobody reads this queue, so the call parks on its second send
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        let slow = {
            let agent = agent.clone();
            tokio::spawn(async move {
                agent
                    .execute_stream("x y".to_string(), CancellationToken::new(), tx_slow)
                    .await
            })
        };
        while agent.status() != "processing" {
            tokio::task::yield_now().await;
        }

        agent
            .execute("quick".to_string(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(agent.status(), "processing");

        while rx_slow.recv().await.is_some() {}
        slow.await.unwrap().unwrap();
        assert_eq!(agent.status(), "ready");
    }

    #[tokio::test]
    async fn test_cancelled_call_fails() {
        let agent = EchoAgent::new("echo");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent.execute("x".to_string(), cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled(_)));
    }
}
