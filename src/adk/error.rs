// SPDX-License-Identifier: MIT

//! Typed error handling for conductor-rs
//!
//! Every failure in the orchestrator or the workflow executor ends up as one
//! of these variants, so callers can tell routing, agent, graph, checkpoint
//! and cancellation failures apart.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for conductor-rs
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Failure reported by (or while building) an agent backend
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Workflow graph and execution errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Checkpoint persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration errors (invalid config file, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Errors raised by agent backends
#[derive(Debug, Error)]
pub enum AgentError {
    /// The backend call failed (non-zero exit, API failure, ...)
    #[error("agent '{agent}' failed: {message}")]
    Failed { agent: String, message: String },

    /// The routed agent name is not part of the live agent set
    #[error("Agent {0} not found")]
    NotFound(String),

    /// No builder registered for an agent kind
    #[error("unknown agent kind: {0}")]
    UnknownKind(String),

    /// Agent spec is missing a required value
    #[error("invalid spec for agent '{agent}': {message}")]
    InvalidSpec { agent: String, message: String },

    /// The call was cancelled before it finished
    #[error("agent '{0}' call cancelled")]
    Cancelled(String),
}

/// Workflow-specific errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The graph has no node of type `start`
    #[error("workflow has no start node")]
    NoStartNode,

    /// No handler registered for a node type
    #[error("no handler for node type: {0}")]
    NoHandler(String),

    /// A handler failed; the walk stops at this node
    #[error("node {node} failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<ConductorError>,
    },

    /// A prompt node ran without an orchestrator attached
    #[error("orchestrator not configured")]
    OrchestratorMissing,

    /// The orchestrator reported an error fragment for a prompt node
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    /// A run is already in progress on this executor
    #[error("workflow is already running")]
    AlreadyRunning,

    /// The optional walk step guard tripped
    #[error("workflow exceeded the step limit of {0} nodes")]
    StepLimit(usize),

    /// File not found when loading a workflow
    #[error("workflow file not found: {0}")]
    FileNotFound(String),

    /// Workflow definition could not be parsed
    #[error("failed to parse workflow {path}: {message}")]
    Parse { path: String, message: String },
}

/// Checkpoint read/write errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to create checkpoint directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to parse checkpoint {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConductorError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// True when this error (or the node failure wrapping it) came from the
    /// cancellation signal rather than an ordinary failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Agent(AgentError::Cancelled(_)) => true,
            Self::Workflow(WorkflowError::NodeFailed { source, .. }) => source.is_cancelled(),
            _ => false,
        }
    }
}

impl AgentError {
    /// Create a backend failure for the named agent
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

impl WorkflowError {
    /// Wrap a handler failure with the node it happened in
    pub fn node_failed(node: impl Into<String>, source: ConductorError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }
}

impl From<&str> for ConductorError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for ConductorError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

/// Convenience alias used across the crate
pub type Result<T, E = ConductorError> = std::result::Result<T, E>;
