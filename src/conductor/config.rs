// SPDX-License-Identifier: MIT

//! YAML configuration for the orchestrator and workflow runs
//!
//! A missing config file is not an error: [`ConductorConfig::load`] falls
//! back to the defaults. Environment variables override file values.

use crate::adk::error::{ConductorError, Result};
use crate::conductor::orchestrator::TaskCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Which classifier the orchestrator uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Keyword,
    Passthrough,
}

/// How to build one named agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    /// Backend kind, looked up in the agent factory
    pub kind: String,
    #[serde(default)]
    pub model: String,
    /// Human-readable role, shown in status listings
    #[serde(default)]
    pub role: String,
    /// Backend-specific settings
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub default_agent: String,
    pub classifier: ClassifierKind,
    pub routes: HashMap<TaskCategory, String>,
    pub agents: HashMap<String, AgentSpec>,
    /// Capacity of every progress/relay queue
    pub stream_buffer: usize,
    pub workflow_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Autosave period while a workflow runs; 0 disables it
    pub autosave_secs: u64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        let mut agents = HashMap::new();
        agents.insert(
            "sonnet".to_string(),
            AgentSpec {
                kind: "echo".to_string(),
                model: "echo".to_string(),
                role: "General coding tasks".to_string(),
                options: HashMap::new(),
            },
        );

        Self {
            default_agent: "sonnet".to_string(),
            classifier: ClassifierKind::Keyword,
            routes: HashMap::new(),
            agents,
            stream_buffer: 100,
            workflow_dir: PathBuf::from(".vscode/workflows"),
            checkpoint_dir: PathBuf::from(".vscode/workflows/.checkpoints"),
            autosave_secs: 30,
        }
    }
}

impl ConductorConfig {
    /// Load from a YAML file, falling back to defaults when it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::parse_yaml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn parse_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Apply `CONDUCTOR_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(agent) = env::var("CONDUCTOR_DEFAULT_AGENT") {
            self.default_agent = agent;
        }
        if let Ok(dir) = env::var("CONDUCTOR_CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("CONDUCTOR_WORKFLOW_DIR") {
            self.workflow_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_agent.trim().is_empty() {
            return Err(ConductorError::config("default_agent must not be empty"));
        }
        if self.stream_buffer == 0 {
            return Err(ConductorError::config("stream_buffer must be at least 1"));
        }
        for (name, spec) in &self.agents {
            if spec.kind.trim().is_empty() {
                return Err(ConductorError::config(format!(
                    "agent '{}' has no kind",
                    name
                )));
            }
        }
        Ok(())
    }
}
