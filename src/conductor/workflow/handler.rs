// SPDX-License-Identifier: MIT

//! Node handlers and the type-keyed registry the walk dispatches through
//!
//! There are two handler flavours. [`NodeHandler`] runs a node to completion
//! without reporting anything; [`StreamingNodeHandler`] may emit progress
//! events and wait for answers. The streaming walk prefers a streaming
//! handler and falls back to a plain one.

use super::answer::AnswerSlot;
use super::context::{ExecutionContext, USER_ANSWER_VAR};
use super::progress::{ExecutionProgress, ProgressSink, ProgressStatus};
use super::types::{node_types, Node};
use crate::adk::agent::ChunkKind;
use crate::adk::error::{ConductorError, Result, WorkflowError};
use crate::conductor::orchestrator::Orchestrator;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a plain handler gets to work with
pub struct NodeEnv<'a> {
    pub orchestrator: Option<&'a Arc<Orchestrator>>,
    pub cancel: &'a CancellationToken,
}

impl NodeEnv<'_> {
    fn orchestrator(&self) -> Result<&Arc<Orchestrator>> {
        self.orchestrator
            .ok_or_else(|| WorkflowError::OrchestratorMissing.into())
    }
}

/// What a streaming handler gets to work with
pub struct StreamEnv<'a> {
    pub base: NodeEnv<'a>,
    pub sink: &'a ProgressSink,
    pub answers: &'a AnswerSlot,
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, node: &Node, ctx: &mut ExecutionContext, env: &NodeEnv<'_>)
        -> Result<()>;
}

#[async_trait]
pub trait StreamingNodeHandler: Send + Sync {
    async fn handle_stream(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        env: &StreamEnv<'_>,
    ) -> Result<()>;
}

/// `start` and `end`
pub struct NoopHandler;

#[async_trait]
impl NodeHandler for NoopHandler {
    async fn handle(&self, _: &Node, _: &mut ExecutionContext, _: &NodeEnv<'_>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StreamingNodeHandler for NoopHandler {
    async fn handle_stream(
        &self,
        _: &Node,
        _: &mut ExecutionContext,
        _: &StreamEnv<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

/// `prompt`: interpolate the template and hand it to the orchestrator
pub struct PromptHandler;

#[async_trait]
impl NodeHandler for PromptHandler {
    async fn handle(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        env: &NodeEnv<'_>,
    ) -> Result<()> {
        let orchestrator = env.orchestrator()?;
        let prompt = ctx.interpolate_prompt(&node.data.prompt);

        let task = orchestrator.process(&prompt, env.cancel).await;
        if task.is_error() {
            if env.cancel.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }
            return Err(WorkflowError::Orchestrator(task.result).into());
        }
        ctx.set_result(node.id.clone(), task.result);
        Ok(())
    }
}

#[async_trait]
impl StreamingNodeHandler for PromptHandler {
    async fn handle_stream(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        env: &StreamEnv<'_>,
    ) -> Result<()> {
        let orchestrator = env.base.orchestrator()?;
        let prompt = ctx.interpolate_prompt(&node.data.prompt);
        let cancel = env.base.cancel;

        let mut updates = orchestrator.process_stream(prompt, cancel.clone());
        let mut result = String::new();
        while let Some(update) = updates.recv().await {
            match update.kind {
                ChunkKind::Output => {
                    result.push_str(&update.message);
                    env.sink
                        .emit(
                            ExecutionProgress::for_node(node, ProgressStatus::Output)
                                .with_output(update.message),
                        )
                        .await;
                }
                ChunkKind::Status | ChunkKind::Thinking => {
                    let line = if update.agent.is_empty() {
                        update.message
                    } else {
                        format!("[{}] {}", update.agent, update.message)
                    };
                    env.sink
                        .emit(ExecutionProgress::for_node(node, ProgressStatus::Output).with_output(line))
                        .await;
                }
                ChunkKind::Error => {
                    if cancel.is_cancelled() {
                        return Err(ConductorError::Cancelled);
                    }
                    return Err(WorkflowError::Orchestrator(update.message).into());
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ConductorError::Cancelled);
        }
        ctx.set_result(node.id.clone(), result);
        Ok(())
    }
}

/// `askUserQuestion`
pub struct QuestionHandler;

#[async_trait]
impl NodeHandler for QuestionHandler {
    /// Without a consumer there is nobody to ask; record the question as
    /// pending and move on.
    async fn handle(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        _env: &NodeEnv<'_>,
    ) -> Result<()> {
        ctx.set_result(
            node.id.clone(),
            json!({
                "question": node.data.question_text,
                "options": node.option_labels(),
                "pending": true,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl StreamingNodeHandler for QuestionHandler {
    async fn handle_stream(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        env: &StreamEnv<'_>,
    ) -> Result<()> {
        env.answers.mark_waiting(&node.id);
        env.sink
            .emit(ExecutionProgress::waiting(
                node,
                node.data.question_text.clone(),
                node.option_labels(),
            ))
            .await;
        log::info!("Waiting for answer to {}", node.id);

        let Some(answer) = env.answers.wait(&node.id, env.base.cancel).await else {
            log::info!("Question {} cancelled", node.id);
            return Err(ConductorError::Cancelled);
        };

        ctx.set_result(node.id.clone(), answer.clone());
        ctx.set(USER_ANSWER_VAR, answer);
        Ok(())
    }
}

/// Node type → handler tables
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    plain: HashMap<String, Arc<dyn NodeHandler>>,
    streaming: HashMap<String, Arc<dyn StreamingNodeHandler>>,
}

impl HandlerRegistry {
    /// Registry with the built-in node types
    pub fn new() -> Self {
        let mut registry = Self::default();
        for node_type in [node_types::START, node_types::END] {
            registry.register(node_type, Arc::new(NoopHandler));
            registry.register_streaming(node_type, Arc::new(NoopHandler));
        }
        registry.register(node_types::PROMPT, Arc::new(PromptHandler));
        registry.register_streaming(node_types::PROMPT, Arc::new(PromptHandler));
        registry.register(node_types::ASK_USER_QUESTION, Arc::new(QuestionHandler));
        registry.register_streaming(node_types::ASK_USER_QUESTION, Arc::new(QuestionHandler));
        registry
    }

    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.plain.insert(node_type.into(), handler);
    }

    pub fn register_streaming(
        &mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn StreamingNodeHandler>,
    ) {
        self.streaming.insert(node_type.into(), handler);
    }

    pub fn plain(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.plain.get(node_type).cloned()
    }

    pub fn streaming(&self, node_type: &str) -> Option<Arc<dyn StreamingNodeHandler>> {
        self.streaming.get(node_type).cloned()
    }

    /// Every node type with at least one handler, sorted
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .plain
            .keys()
            .chain(self.streaming.keys())
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }
}
