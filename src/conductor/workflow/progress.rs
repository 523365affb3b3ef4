// SPDX-License-Identifier: MIT

//! Progress events and the reporting state they drive
//!
//! Every event the walk emits goes through a [`ProgressSink`], which first
//! folds it into the run's [`RunReport`] (node-status table plus output log)
//! and then forwards it to the consumer. Checkpoints are cut from the report.

use super::types::{Node, Workflow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Status tag of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    Output,
    Completed,
    Error,
    WaitingInput,
}

/// One step of executor activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Empty for run-level (terminal) events
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: ProgressStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Set on the terminal event; the stream closes after it
    pub done: bool,
}

impl ExecutionProgress {
    pub fn for_node(node: &Node, status: ProgressStatus) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            node_type: node.node_type.clone(),
            status,
            output: String::new(),
            question: None,
            options: Vec::new(),
            done: false,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn waiting(node: &Node, question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            question: Some(question.into()),
            options,
            ..Self::for_node(node, ProgressStatus::WaitingInput)
        }
    }

    /// Run-level terminal event
    pub fn finished(status: ProgressStatus, output: impl Into<String>) -> Self {
        Self {
            node_id: String::new(),
            node_name: String::new(),
            node_type: String::new(),
            status,
            output: output.into(),
            question: None,
            options: Vec::new(),
            done: true,
        }
    }

    pub fn is_node_event(&self) -> bool {
        !self.node_id.is_empty()
    }
}

/// Execution status of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
    WaitingInput,
}

/// One row of the node-status table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub output: String,
}

/// Reporting state of a run: what a consumer has seen so far
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub nodes: Vec<NodeState>,
    /// Row index of the node last started
    pub current_node: usize,
    pub output: String,
    pub results: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    /// Time already spent before a restored checkpoint
    pub elapsed_before: Duration,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Fresh table with every reachable node pending
    pub fn for_workflow(workflow: &Workflow) -> Self {
        let nodes = workflow
            .display_order()
            .into_iter()
            .map(|n| NodeState {
                id: n.id.clone(),
                name: n.display_name().to_string(),
                node_type: n.node_type.clone(),
                status: NodeStatus::Pending,
                output: String::new(),
            })
            .collect();
        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Clear the previous run before a fresh one. Variables and the last
    /// save time are kept.
    pub fn reset(&mut self) {
        for row in &mut self.nodes {
            row.status = NodeStatus::Pending;
            row.output.clear();
        }
        self.current_node = 0;
        self.output.clear();
        self.results.clear();
        self.started_at = None;
        self.elapsed_before = Duration::ZERO;
    }

    pub fn node(&self, id: &str) -> Option<&NodeState> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }

    /// Fold one event into the table and output log
    pub fn apply(&mut self, event: &ExecutionProgress) {
        if !event.is_node_event() {
            return;
        }
        if event.status == ProgressStatus::Output {
            self.output.push_str(&event.output);
        }

        let Some(index) = self.nodes.iter().position(|n| n.id == event.node_id) else {
            return;
        };
        let row = &mut self.nodes[index];
        match event.status {
            ProgressStatus::Started => {
                row.status = NodeStatus::Running;
                self.current_node = index;
            }
            ProgressStatus::Output => row.output.push_str(&event.output),
            ProgressStatus::Completed => row.status = NodeStatus::Completed,
            ProgressStatus::Error => {
                row.status = NodeStatus::Error;
                row.output = event.output.clone();
            }
            ProgressStatus::WaitingInput => row.status = NodeStatus::WaitingInput,
        }
    }

    /// Total running time, including time before a restore
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let since_start = self
            .started_at
            .and_then(|start| (now - start).to_std().ok())
            .unwrap_or_default();
        self.elapsed_before + since_start
    }
}

/// Shared handle to a run's report
pub type SharedReport = Arc<RwLock<RunReport>>;

pub(crate) fn read_report(report: &SharedReport) -> std::sync::RwLockReadGuard<'_, RunReport> {
    report.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_report(report: &SharedReport) -> std::sync::RwLockWriteGuard<'_, RunReport> {
    report.write().unwrap_or_else(PoisonError::into_inner)
}

/// Where a run's events go: the report first, then the consumer queue
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ExecutionProgress>>,
    report: SharedReport,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ExecutionProgress>, report: SharedReport) -> Self {
        Self {
            tx: Some(tx),
            report,
        }
    }

    /// Sink that only updates the report
    pub fn detached(report: SharedReport) -> Self {
        Self { tx: None, report }
    }

    pub async fn emit(&self, event: ExecutionProgress) {
        write_report(&self.report).apply(&event);
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                log::debug!("Workflow progress consumer went away");
            }
        }
    }
}
