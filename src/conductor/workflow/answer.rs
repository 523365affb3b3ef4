//! Single-slot hand-off for answers to `askUserQuestion` nodes

use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Holds at most one answer. An answer given while no question is open is
/// kept for the next question; a newer answer replaces an unconsumed one.
#[derive(Debug, Default)]
pub struct AnswerSlot {
    answer: Mutex<Option<String>>,
    /// Node currently waiting for an answer
    waiting: Mutex<Option<String>>,
    notify: Notify,
}

impl AnswerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, answer: impl Into<String>) {
        let mut slot = self.answer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            log::debug!("Replacing unconsumed answer");
        }
        *slot = Some(answer.into());
        drop(slot);
        self.notify.notify_one();
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_node().is_some()
    }

    pub fn waiting_node(&self) -> Option<String> {
        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop any buffered answer
    pub fn clear(&self) {
        self.answer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn take(&self) -> Option<String> {
        self.answer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_waiting(&self, node_id: Option<String>) {
        *self.waiting.lock().unwrap_or_else(PoisonError::into_inner) = node_id;
    }

    /// Open a question ahead of [`wait`](Self::wait), so the flag is already
    /// visible when the question is announced
    pub fn mark_waiting(&self, node_id: &str) {
        self.set_waiting(Some(node_id.to_string()));
    }

    /// Wait for an answer on behalf of `node_id`.
    ///
    /// Returns `None` if `cancel` fires first. A cancelled token wins over a
    /// buffered answer, which stays in the slot. The waiting flag is set for
    /// the duration of the call and cleared on both paths.
    pub async fn wait(&self, node_id: &str, cancel: &CancellationToken) -> Option<String> {
        self.set_waiting(Some(node_id.to_string()));
        let answer = loop {
            if cancel.is_cancelled() {
                break None;
            }
            if let Some(answer) = self.take() {
                break Some(answer);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                _ = self.notify.notified() => {}
            }
        };
        self.set_waiting(None);
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_answer_is_used_by_next_wait() {
        let slot = AnswerSlot::new();
        slot.provide("early");
        assert!(!slot.is_waiting());

        let answer = slot.wait("q", &CancellationToken::new()).await;
        assert_eq!(answer.as_deref(), Some("early"));
        assert!(!slot.is_waiting());
    }

    #[tokio::test]
    async fn test_second_answer_overwrites_first() {
        let slot = AnswerSlot::new();
        slot.provide("first");
        slot.provide("second");

        let answer = slot.wait("q", &CancellationToken::new()).await;
        assert_eq!(answer.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_wait_then_answer() {
        let slot = Arc::new(AnswerSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait("q", &CancellationToken::new()).await })
        };

        while !slot.is_waiting() {
            tokio::task::yield_now().await;
        }
        assert_eq!(slot.waiting_node().as_deref(), Some("q"));
        slot.provide("B");

        assert_eq!(waiter.await.unwrap().as_deref(), Some("B"));
        assert!(!slot.is_waiting());
    }

    #[tokio::test]
    async fn test_cancel_releases_wait() {
        let slot = Arc::new(AnswerSlot::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let slot = slot.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { slot.wait("q", &cancel).await })
        };

        while !slot.is_waiting() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let answer = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(answer.is_none());
        assert!(!slot.is_waiting());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_buffered_answer() {
        let slot = AnswerSlot::new();
        slot.provide("A");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(slot.wait("q", &cancel).await.is_none());
        assert!(!slot.is_waiting());

        // Answer is still there for a later, uncancelled wait
        let answer = slot.wait("q", &CancellationToken::new()).await;
        assert_eq!(answer.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_clear_drops_buffered_answer() {
        let slot = AnswerSlot::new();
        slot.provide("stale");
        slot.clear();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(slot.wait("q", &cancel).await.is_none());
    }
}
