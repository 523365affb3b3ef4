//! Agent factory - constructs agents from config specs
//!
//! Backend kinds are registered as [`AgentBuilder`]s. The factory ships with
//! the offline `echo` kind; hosts register their process or SDK backends.

use crate::adk::agent::{Agent, EchoAgent};
use crate::adk::error::AgentError;
use crate::conductor::config::AgentSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Builds one agent of a given kind
pub trait AgentBuilder: Send + Sync {
    fn build(&self, name: &str, spec: &AgentSpec) -> Result<Arc<dyn Agent>, AgentError>;
}

impl<F> AgentBuilder for F
where
    F: Fn(&str, &AgentSpec) -> Result<Arc<dyn Agent>, AgentError> + Send + Sync,
{
    fn build(&self, name: &str, spec: &AgentSpec) -> Result<Arc<dyn Agent>, AgentError> {
        self(name, spec)
    }
}

/// Builder for [`EchoAgent`]; reads `prefix` and `delay_ms` options
pub struct EchoBuilder;

impl AgentBuilder for EchoBuilder {
    fn build(&self, name: &str, spec: &AgentSpec) -> Result<Arc<dyn Agent>, AgentError> {
        let mut agent = EchoAgent::new(name);
        if !spec.model.is_empty() {
            agent = agent.with_model(spec.model.clone());
        }
        if let Some(prefix) = spec.options.get("prefix") {
            let prefix = prefix.as_str().ok_or_else(|| AgentError::InvalidSpec {
                agent: name.to_string(),
                message: "option 'prefix' must be a string".to_string(),
            })?;
            agent = agent.with_prefix(prefix);
        }
        if let Some(delay) = spec.options.get("delay_ms") {
            let ms = delay.as_u64().ok_or_else(|| AgentError::InvalidSpec {
                agent: name.to_string(),
                message: "option 'delay_ms' must be a non-negative integer".to_string(),
            })?;
            agent = agent.with_delay(Duration::from_millis(ms));
        }
        Ok(Arc::new(agent))
    }
}

/// Registry of agent builders keyed by kind
#[derive(Clone)]
pub struct AgentFactory {
    builders: Arc<RwLock<HashMap<String, Arc<dyn AgentBuilder>>>>,
}

impl AgentFactory {
    /// Factory with only the built-in kinds registered
    pub fn new() -> Self {
        let mut builders: HashMap<String, Arc<dyn AgentBuilder>> = HashMap::new();
        builders.insert("echo".to_string(), Arc::new(EchoBuilder));
        Self {
            builders: Arc::new(RwLock::new(builders)),
        }
    }

    pub async fn register(&self, kind: impl Into<String>, builder: Arc<dyn AgentBuilder>) {
        let mut builders = self.builders.write().await;
        builders.insert(kind.into(), builder);
    }

    pub async fn kinds(&self) -> Vec<String> {
        let builders = self.builders.read().await;
        let mut kinds: Vec<String> = builders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build an agent from its spec
    pub async fn build(&self, name: &str, spec: &AgentSpec) -> Result<Arc<dyn Agent>, AgentError> {
        let builder = {
            let builders = self.builders.read().await;
            builders.get(&spec.kind).cloned()
        };
        let builder = builder.ok_or_else(|| AgentError::UnknownKind(spec.kind.clone()))?;
        log::debug!("Building agent '{}' with kind '{}'", name, spec.kind);
        builder.build(name, spec)
    }
}

impl Default for AgentFactory {
    fn default() -> Self {
        Self::new()
    }
}
