// SPDX-License-Identifier: MIT

//! Workflow graphs and their executor

pub mod answer;
pub mod checkpoint;
pub mod context;
pub mod executor;
pub mod handler;
pub mod loader;
pub mod progress;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use context::{ExecutionContext, USER_ANSWER_VAR};
pub use executor::{Executor, ExecutorStatus};
pub use handler::{HandlerRegistry, NodeHandler, StreamingNodeHandler};
pub use loader::WorkflowLoader;
pub use progress::{ExecutionProgress, NodeState, NodeStatus, ProgressStatus, RunReport};
pub use types::{node_types, Connection, Node, NodeData, QuestionOption, Workflow};
