//! Workflow executor
//!
//! Walks the graph depth-first from the start node and dispatches each node to
//! the handler registered for its type. Every successor of a node is visited,
//! in connection order, so a node reached along two paths runs twice. An `end`
//! node stops its branch. There is no cycle detection unless a step limit is
//! set.
//!
//! The walking task owns the [`ExecutionContext`]. Everything a consumer can
//! observe (node statuses, output log, results) lives in the run's
//! [`RunReport`], which is updated from the same events the consumer receives.

use super::answer::AnswerSlot;
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::context::ExecutionContext;
use super::handler::{HandlerRegistry, NodeEnv, NodeHandler, StreamEnv, StreamingNodeHandler};
use super::progress::{
    read_report, write_report, ExecutionProgress, NodeState, NodeStatus, ProgressSink,
    ProgressStatus, RunReport, SharedReport,
};
use super::types::{node_types, Node, Workflow};
use crate::adk::error::{CheckpointError, ConductorError, Result, WorkflowError};
use crate::conductor::orchestrator::{Orchestrator, DEFAULT_STREAM_BUFFER};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const COMPLETED_MESSAGE: &str = "Workflow completed successfully";

/// Overall state of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl ExecutorStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Per-run state threaded through the walk
struct RunScope<'a> {
    sink: &'a ProgressSink,
    cancel: &'a CancellationToken,
    streaming: bool,
    /// Nodes restored as completed; framed but not dispatched
    skip: &'a HashSet<String>,
}

/// Runs one workflow instance
pub struct Executor {
    workflow: Workflow,
    workflow_path: Option<PathBuf>,
    orchestrator: Option<Arc<Orchestrator>>,
    handlers: HandlerRegistry,
    /// Context the next walk starts from
    seed: Mutex<ExecutionContext>,
    report: SharedReport,
    answers: AnswerSlot,
    /// Cancellation signal of the current run; replaced when a run begins
    cancel: Mutex<CancellationToken>,
    status: Mutex<ExecutorStatus>,
    max_steps: Option<usize>,
    buffer: usize,
}

impl Executor {
    pub fn new(workflow: Workflow, orchestrator: Option<Arc<Orchestrator>>) -> Self {
        let report = RunReport::for_workflow(&workflow);
        Self {
            workflow,
            workflow_path: None,
            orchestrator,
            handlers: HandlerRegistry::new(),
            seed: Mutex::new(ExecutionContext::new()),
            report: Arc::new(RwLock::new(report)),
            answers: AnswerSlot::new(),
            cancel: Mutex::new(CancellationToken::new()),
            status: Mutex::new(ExecutorStatus::Idle),
            max_steps: None,
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Record the file the workflow came from; checkpoints are keyed by its
    /// stem.
    pub fn with_workflow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.workflow_path = Some(path.into());
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Stop the walk with [`WorkflowError::StepLimit`] after `steps` nodes
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity.max(1);
        self
    }

    pub fn register_handler(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.register(node_type, handler);
    }

    pub fn register_streaming_handler(
        &mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn StreamingNodeHandler>,
    ) {
        self.handlers.register_streaming(node_type, handler);
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn workflow_path(&self) -> Option<&Path> {
        self.workflow_path.as_deref()
    }

    pub fn status(&self) -> ExecutorStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a variable for the next run
    pub fn set_variable(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key.clone(), value.clone());
        write_report(&self.report).variables.insert(key, value);
    }

    /// Node results recorded so far
    pub fn results(&self) -> HashMap<String, Value> {
        read_report(&self.report).results.clone()
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        read_report(&self.report).variables.clone()
    }

    /// Node-status table, in display order
    pub fn node_states(&self) -> Vec<NodeState> {
        read_report(&self.report).nodes.clone()
    }

    pub fn output(&self) -> String {
        read_report(&self.report).output.clone()
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        read_report(&self.report).last_saved_at
    }

    /// Snapshot of the whole report
    pub fn report(&self) -> RunReport {
        read_report(&self.report).clone()
    }

    /// Answer the open question, or the next one if none is open
    pub fn provide_answer(&self, answer: impl Into<String>) {
        self.answers.provide(answer);
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.answers.is_waiting()
    }

    /// Cancel the current run. Pending waits return immediately. The next
    /// run gets a fresh signal.
    pub fn cancel(&self) {
        log::info!("Cancelling workflow {}", self.workflow.name);
        self.cancellation_token().cancel();
    }

    /// Signal of the current (or most recent) run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the workflow with plain handlers only. Questions are recorded as
    /// pending instead of waiting for an answer.
    pub async fn execute(&self) -> Result<()> {
        let cancel = self.begin_run(true)?;
        let sink = ProgressSink::detached(self.report.clone());
        let skip = HashSet::new();
        let run = RunScope {
            sink: &sink,
            cancel: &cancel,
            streaming: false,
            skip: &skip,
        };
        let mut ctx = self.seed_context();
        let outcome = self.walk(&mut ctx, &run).await;
        self.finish(&outcome);
        outcome
    }

    /// Run the workflow in the background and return its progress stream.
    ///
    /// The stream ends with exactly one event with `done` set.
    pub fn execute_async(self: &Arc<Self>) -> Result<mpsc::Receiver<ExecutionProgress>> {
        self.spawn_walk(HashSet::new(), true)
    }

    /// Like [`execute_async`](Self::execute_async), but nodes a restored
    /// checkpoint marks completed are not run again; they are reported as
    /// started and completed so the event order is unchanged. Other rows are
    /// reset to pending.
    pub fn resume_async(self: &Arc<Self>) -> Result<mpsc::Receiver<ExecutionProgress>> {
        if self.status() == ExecutorStatus::Running {
            return Err(WorkflowError::AlreadyRunning.into());
        }
        let skip = {
            let mut report = write_report(&self.report);
            let mut skip = HashSet::new();
            for row in report.nodes.iter_mut() {
                if row.status == NodeStatus::Completed {
                    skip.insert(row.id.clone());
                } else {
                    row.status = NodeStatus::Pending;
                    row.output.clear();
                }
            }
            skip
        };
        log::info!(
            "Resuming workflow {} with {} completed nodes",
            self.workflow.name,
            skip.len()
        );
        self.spawn_walk(skip, false)
    }

    fn spawn_walk(
        self: &Arc<Self>,
        skip: HashSet<String>,
        fresh: bool,
    ) -> Result<mpsc::Receiver<ExecutionProgress>> {
        let cancel = self.begin_run(fresh)?;
        let (tx, rx) = mpsc::channel(self.buffer);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let sink = ProgressSink::new(tx, this.report.clone());
            let run = RunScope {
                sink: &sink,
                cancel: &cancel,
                streaming: true,
                skip: &skip,
            };
            let mut ctx = this.seed_context();
            let outcome = this.walk(&mut ctx, &run).await;
            this.finish(&outcome);

            let last = match &outcome {
                Ok(()) => ExecutionProgress::finished(ProgressStatus::Completed, COMPLETED_MESSAGE),
                Err(e) => ExecutionProgress::finished(ProgressStatus::Error, e.to_string()),
            };
            sink.emit(last).await;
        });
        Ok(rx)
    }

    /// Mark the executor running and hand out the run's cancellation signal.
    /// A fresh run clears the previous run's results and report; a resumed
    /// one keeps what was restored.
    fn begin_run(&self, fresh: bool) -> Result<CancellationToken> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == ExecutorStatus::Running {
            return Err(WorkflowError::AlreadyRunning.into());
        }
        *status = ExecutorStatus::Running;
        drop(status);

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        if fresh {
            self.seed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .results
                .clear();
        }
        let mut report = write_report(&self.report);
        if fresh {
            report.reset();
        }
        if report.started_at.is_none() {
            report.started_at = Some(Utc::now());
        }
        log::info!("Starting workflow {}", self.workflow.name);
        Ok(cancel)
    }

    fn finish(&self, outcome: &Result<()>) {
        let status = match outcome {
            Ok(()) => {
                log::info!("Workflow {} completed", self.workflow.name);
                ExecutorStatus::Completed
            }
            Err(e) if e.is_cancelled() => {
                log::info!("Workflow {} cancelled", self.workflow.name);
                ExecutorStatus::Cancelled
            }
            Err(e) => {
                log::error!("Workflow {} failed: {}", self.workflow.name, e);
                ExecutorStatus::Error
            }
        };
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn seed_context(&self) -> ExecutionContext {
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy the walker's results and variables into the report
    fn publish(&self, ctx: &ExecutionContext) {
        let mut report = write_report(&self.report);
        report.results = ctx.results.clone();
        report.variables = ctx.variables.clone();
    }

    async fn walk(&self, ctx: &mut ExecutionContext, run: &RunScope<'_>) -> Result<()> {
        let start = self
            .workflow
            .start_node()
            .ok_or(WorkflowError::NoStartNode)?;

        // Successors are pushed in reverse so they pop in connection order
        let mut stack = vec![start];
        let mut steps = 0usize;
        while let Some(node) = stack.pop() {
            if run.cancel.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }
            steps += 1;
            if let Some(limit) = self.max_steps {
                if steps > limit {
                    return Err(WorkflowError::StepLimit(limit).into());
                }
            }

            let outcome = self.run_node(node, ctx, run).await;
            self.publish(ctx);
            outcome?;

            if node.is_type(node_types::END) {
                continue;
            }
            for next in self.workflow.next_nodes(&node.id).into_iter().rev() {
                stack.push(next);
            }
        }
        Ok(())
    }

    async fn run_node(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        run: &RunScope<'_>,
    ) -> Result<()> {
        let sink = run.sink;
        log::info!("Executing node: {} ({})", node.id, node.node_type);
        sink.emit(ExecutionProgress::for_node(node, ProgressStatus::Started))
            .await;

        if !run.skip.contains(&node.id) {
            match self.dispatch(node, ctx, run).await {
                Ok(()) => {}
                Err(e @ ConductorError::Workflow(WorkflowError::NoHandler(_))) => return Err(e),
                Err(e) => {
                    log::warn!("Node {} failed: {}", node.id, e);
                    sink.emit(
                        ExecutionProgress::for_node(node, ProgressStatus::Error)
                            .with_output(e.to_string()),
                    )
                    .await;
                    return Err(WorkflowError::node_failed(node.id.clone(), e).into());
                }
            }
        } else {
            log::debug!("Node {} restored as completed, skipping", node.id);
        }

        sink.emit(ExecutionProgress::for_node(node, ProgressStatus::Completed))
            .await;
        Ok(())
    }

    async fn dispatch(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
        run: &RunScope<'_>,
    ) -> Result<()> {
        let base = NodeEnv {
            orchestrator: self.orchestrator.as_ref(),
            cancel: run.cancel,
        };
        if run.streaming {
            if let Some(handler) = self.handlers.streaming(&node.node_type) {
                let env = StreamEnv {
                    base,
                    sink: run.sink,
                    answers: &self.answers,
                };
                return handler.handle_stream(node, ctx, &env).await;
            }
        }
        match self.handlers.plain(&node.node_type) {
            Some(handler) => handler.handle(node, ctx, &base).await,
            None => Err(WorkflowError::NoHandler(node.node_type.clone()).into()),
        }
    }

    /// Snapshot of the current reporting state
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::capture(
            &self.workflow,
            self.workflow_path.as_deref(),
            &read_report(&self.report),
        )
    }

    /// Write a checkpoint. On failure nothing in memory changes.
    pub fn save_checkpoint(&self, store: &CheckpointStore) -> Result<PathBuf, CheckpointError> {
        let checkpoint = self.checkpoint();
        let path = store.save(&checkpoint)?;
        write_report(&self.report).last_saved_at = Some(checkpoint.saved_at);
        Ok(path)
    }

    /// Load reporting state from a checkpoint: statuses and outputs of matching
    /// nodes, results, variables and the output log, followed by a resume
    /// marker. The graph walk is not re-entered; see
    /// [`resume_async`](Self::resume_async).
    pub fn restore_from_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.status() == ExecutorStatus::Running {
            return Err(WorkflowError::AlreadyRunning.into());
        }
        if checkpoint.workflow_id != self.workflow.id {
            log::warn!(
                "Restoring checkpoint of workflow {} into {}",
                checkpoint.workflow_id,
                self.workflow.id
            );
        }

        {
            let mut report = write_report(&self.report);
            for saved in &checkpoint.node_states {
                if let Some(row) = report.nodes.iter_mut().find(|n| n.id == saved.id) {
                    row.status = saved.status;
                    row.output = saved.output.clone();
                }
            }
            report.current_node = checkpoint
                .current_node
                .min(report.nodes.len().saturating_sub(1));
            report.results = checkpoint.results.clone();
            report.variables = checkpoint.variables.clone();
            report.output = checkpoint.output.clone();
            report.output.push_str(&checkpoint.resume_marker());
            report.elapsed_before = checkpoint.elapsed_before;
            report.started_at = None;
            report.last_saved_at = Some(checkpoint.saved_at);
        }

        let mut seed = self.seed.lock().unwrap_or_else(PoisonError::into_inner);
        seed.results = checkpoint.results.clone();
        seed.variables = checkpoint.variables.clone();
        log::info!(
            "Restored {} from checkpoint saved at {}",
            self.workflow.name,
            checkpoint.saved_at
        );
        Ok(())
    }

    /// Save a checkpoint every `period` while the current run is active.
    /// Stops when that run finishes or is cancelled. Failed saves are logged
    /// and retried on the next tick.
    pub fn autosave(self: &Arc<Self>, store: CheckpointStore, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let cancel = self.cancellation_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match this.status() {
                    ExecutorStatus::Running => {
                        if let Err(e) = this.save_checkpoint(&store) {
                            log::warn!("Autosave failed: {}", e);
                        }
                    }
                    ExecutorStatus::Idle => {}
                    _ => break,
                }
            }
            log::debug!("Autosave for {} stopped", this.workflow.name);
        })
    }
}
