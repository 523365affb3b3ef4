// SPDX-License-Identifier: MIT

//! Orchestrator - classifies requests, routes them to an agent and relays
//! the agent's streamed output
//!
//! The agent map is fixed at construction and shared read-only by every
//! in-flight call. Each call owns its own [`Task`] record and progress queue.

mod classifier;
mod router;

pub use classifier::{
    Classifier, KeywordClassifier, KeywordRule, PassthroughClassifier, TaskCategory,
};
pub use router::Router;

use crate::adk::agent::{Agent, ChunkKind, StreamChunk};
use crate::adk::error::AgentError;
use crate::conductor::agent_factory::AgentFactory;
use crate::conductor::config::{ClassifierKind, ConductorConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default capacity of progress and relay queues
pub const DEFAULT_STREAM_BUFFER: usize = 100;

/// Lifecycle of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

/// One processed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub category: TaskCategory,
    pub assigned_to: String,
    pub status: TaskStatus,
    pub result: String,
}

impl Task {
    fn new(content: &str, category: TaskCategory, assigned_to: &str) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            content: content.to_string(),
            category,
            assigned_to: assigned_to.to_string(),
            status: TaskStatus::Processing,
            result: String::new(),
        }
    }

    fn complete(&mut self, result: String) {
        self.status = TaskStatus::Completed;
        self.result = result;
    }

    fn fail(&mut self, error: impl ToString) {
        self.status = TaskStatus::Error;
        self.result = error.to_string();
    }

    pub fn is_error(&self) -> bool {
        self.status == TaskStatus::Error
    }
}

/// Pipeline stage a progress update belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Routing,
    Processing,
    Streaming,
    Completed,
    Error,
}

/// Progress event emitted by [`Orchestrator::process_stream`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub message: String,
    /// Agent the update concerns; empty before routing
    pub agent: String,
    pub kind: ChunkKind,
    /// Set only on the terminal update
    pub done: bool,
}

impl ProgressUpdate {
    fn status(stage: Stage, message: impl Into<String>, agent: &str) -> Self {
        Self {
            stage,
            message: message.into(),
            agent: agent.to_string(),
            kind: ChunkKind::Status,
            done: false,
        }
    }

    fn relay(agent: &str, chunk: StreamChunk) -> Self {
        Self {
            stage: Stage::Streaming,
            message: chunk.content,
            agent: agent.to_string(),
            kind: chunk.kind,
            done: false,
        }
    }

    fn completed(agent: &str) -> Self {
        Self {
            done: true,
            ..Self::status(Stage::Completed, "Done", agent)
        }
    }

    fn failed(agent: &str, message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Error,
            message: message.into(),
            agent: agent.to_string(),
            kind: ChunkKind::Error,
            done: true,
        }
    }
}

/// Routes requests to agents and relays their output
pub struct Orchestrator {
    router: RwLock<Router>,
    classifier: Box<dyn Classifier>,
    agents: HashMap<String, Arc<dyn Agent>>,
    /// Configured agents that failed to build, with the reason
    unavailable: HashMap<String, String>,
    stream_buffer: usize,
}

impl Orchestrator {
    pub fn new(agents: Vec<Arc<dyn Agent>>, router: Router) -> Self {
        Self {
            router: RwLock::new(router),
            classifier: Box::new(KeywordClassifier::default()),
            agents: agents
                .into_iter()
                .map(|a| (a.name().to_string(), a))
                .collect(),
            unavailable: HashMap::new(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    /// Build the agent set from config. Agents that fail to build are
    /// logged and left out; the orchestrator works with whatever is left.
    pub async fn from_config(config: &ConductorConfig, factory: &AgentFactory) -> Self {
        let mut names: Vec<&String> = config.agents.keys().collect();
        names.sort();

        let mut agents = Vec::with_capacity(names.len());
        let mut unavailable = HashMap::new();
        for name in names {
            let spec = &config.agents[name];
            match factory.build(name, spec).await {
                Ok(agent) => {
                    log::info!("Registered agent: {} ({})", name, spec.kind);
                    agents.push(agent);
                }
                Err(e) => {
                    log::warn!("Failed to create agent {}: {}", name, e);
                    unavailable.insert(name.clone(), e.to_string());
                }
            }
        }

        let router = Router::with_routes(config.default_agent.clone(), config.routes.clone());
        let mut orchestrator = Self::new(agents, router).with_stream_buffer(config.stream_buffer);
        orchestrator.unavailable = unavailable;
        match config.classifier {
            ClassifierKind::Keyword => orchestrator,
            ClassifierKind::Passthrough => orchestrator.with_classifier(PassthroughClassifier),
        }
    }

    pub fn classify(&self, input: &str) -> TaskCategory {
        self.classifier.classify(input)
    }

    pub fn route(&self, category: TaskCategory) -> String {
        let router = self.router.read().unwrap_or_else(PoisonError::into_inner);
        router.route(category).to_string()
    }

    pub fn set_route(&self, category: TaskCategory, agent_name: impl Into<String>) {
        let mut router = self.router.write().unwrap_or_else(PoisonError::into_inner);
        router.set_route(category, agent_name);
    }

    pub fn routes(&self) -> HashMap<TaskCategory, String> {
        let router = self.router.read().unwrap_or_else(PoisonError::into_inner);
        router.routes()
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Point-in-time status of every configured agent
    pub fn agent_status(&self) -> HashMap<String, String> {
        let mut status: HashMap<String, String> = self
            .agents
            .iter()
            .map(|(name, agent)| (name.clone(), agent.status()))
            .collect();
        for name in self.unavailable.keys() {
            status.insert(name.clone(), "unavailable".to_string());
        }
        status
    }

    /// Classify, route and run the request to completion.
    ///
    /// Failures are recorded in the returned task rather than returned.
    pub async fn process(&self, input: &str, cancel: &CancellationToken) -> Task {
        let category = self.classify(input);
        let agent_name = self.route(category);
        log::info!("Routing {} task to {}", category, agent_name);

        let mut task = Task::new(input, category, &agent_name);
        let Some(agent) = self.agent(&agent_name) else {
            task.fail(AgentError::NotFound(agent_name));
            return task;
        };

        match agent.execute(input.to_string(), cancel.clone()).await {
            Ok(response) => task.complete(response.content),
            Err(e) => {
                log::error!("Agent {} failed: {}", agent_name, e);
                task.fail(e);
            }
        }
        task
    }

    /// Start processing in the background and return the progress stream.
    pub fn process_stream(
        self: &Arc<Self>,
        input: impl Into<String>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ProgressUpdate> {
        self.spawn_stream(input, cancel).0
    }

    /// Like [`process_stream`](Self::process_stream), also handing back the
    /// task record once the stream has closed.
    pub fn spawn_stream(
        self: &Arc<Self>,
        input: impl Into<String>,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<ProgressUpdate>, JoinHandle<Task>) {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let this = Arc::clone(self);
        let input = input.into();
        let handle = tokio::spawn(async move { this.run_stream(input, cancel, tx).await });
        (rx, handle)
    }

    async fn run_stream(
        &self,
        input: String,
        cancel: CancellationToken,
        progress: mpsc::Sender<ProgressUpdate>,
    ) -> Task {
        let _ = progress
            .send(ProgressUpdate::status(Stage::Routing, "Analyzing task...", ""))
            .await;

        let category = self.classify(&input);
        let agent_name = self.route(category);
        log::info!("Routing {} task to {}", category, agent_name);

        let _ = progress
            .send(ProgressUpdate::status(
                Stage::Routing,
                format!("Routing to {} agent", agent_name),
                &agent_name,
            ))
            .await;

        let mut task = Task::new(&input, category, &agent_name);
        let Some(agent) = self.agent(&agent_name) else {
            task.fail(AgentError::NotFound(agent_name.clone()));
            let _ = progress
                .send(ProgressUpdate::failed(&agent_name, task.result.clone()))
                .await;
            return task;
        };

        let _ = progress
            .send(ProgressUpdate::status(
                Stage::Processing,
                format!("Starting {}...", agent_name),
                &agent_name,
            ))
            .await;

        // The agent writes into its own bounded queue; this task forwards it.
        let (chunk_tx, mut chunk_rx) = mpsc::channel(self.stream_buffer);
        let call_cancel = cancel.clone();
        let mut call =
            tokio::spawn(async move { agent.execute_stream(input, call_cancel, chunk_tx).await });

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                chunk = chunk_rx.recv() => match chunk {
                    Some(chunk) => {
                        if progress.send(ProgressUpdate::relay(&agent_name, chunk)).await.is_err() {
                            log::debug!("Progress consumer for {} went away", task.id);
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }
        drop(chunk_rx);

        let outcome = if cancelled {
            call.abort();
            Err(AgentError::Cancelled(agent_name.clone()))
        } else {
            match (&mut call).await {
                Ok(result) => result,
                Err(e) => Err(AgentError::failed(&agent_name, e.to_string())),
            }
        };

        match outcome {
            Ok(response) => {
                task.complete(response.content);
                let _ = progress.send(ProgressUpdate::completed(&agent_name)).await;
            }
            Err(e) => {
                log::error!("Agent {} failed: {}", agent_name, e);
                task.fail(&e);
                let _ = progress
                    .send(ProgressUpdate::failed(&agent_name, e.to_string()))
                    .await;
            }
        }
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::agent::{AgentResponse, EchoAgent};
    use crate::conductor::config::AgentSpec;
    use async_trait::async_trait;

    /// Agent that streams a fixed script and then returns a fixed result
    struct ScriptedAgent {
        name: String,
        script: Vec<StreamChunk>,
        fail_with: Option<String>,
    }

    impl ScriptedAgent {
        fn new(name: &str, script: Vec<StreamChunk>) -> Self {
            Self {
                name: name.to_string(),
                script,
                fail_with: None,
            }
        }

        fn failing(name: &str, message: &str) -> Self {
            Self {
                name: name.to_string(),
                script: vec![StreamChunk::status("Starting...")],
                fail_with: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            prompt: String,
            _cancel: CancellationToken,
        ) -> Result<AgentResponse, AgentError> {
            match &self.fail_with {
                Some(msg) => Err(AgentError::failed(&self.name, msg.clone())),
                None => Ok(AgentResponse {
                    content: format!("handled: {}", prompt),
                    model: "scripted".to_string(),
                    tokens_used: 1,
                }),
            }
        }

        async fn execute_stream(
            &self,
            _prompt: String,
            _cancel: CancellationToken,
            tx: mpsc::Sender<StreamChunk>,
        ) -> Result<AgentResponse, AgentError> {
            let mut content = String::new();
            for chunk in &self.script {
                if chunk.kind == ChunkKind::Output {
                    content.push_str(&chunk.content);
                }
                let _ = tx.send(chunk.clone()).await;
            }
            match &self.fail_with {
                Some(msg) => Err(AgentError::failed(&self.name, msg.clone())),
                None => Ok(AgentResponse {
                    content,
                    model: "scripted".to_string(),
                    tokens_used: 1,
                }),
            }
        }
    }

    /// Agent that never finishes unless cancelled
    struct HangingAgent;

    #[async_trait]
    impl Agent for HangingAgent {
        fn name(&self) -> &str {
            "sonnet"
        }

        fn model(&self) -> &str {
            "hang"
        }

        async fn execute(
            &self,
            _prompt: String,
            _cancel: CancellationToken,
        ) -> Result<AgentResponse, AgentError> {
            std::future::pending().await
        }

        async fn execute_stream(
            &self,
            _prompt: String,
            _cancel: CancellationToken,
            tx: mpsc::Sender<StreamChunk>,
        ) -> Result<AgentResponse, AgentError> {
            let _ = tx.send(StreamChunk::thinking("hmm")).await;
            std::future::pending().await
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn test_process_completes() {
        let orch = Orchestrator::new(
            vec![Arc::new(ScriptedAgent::new("sonnet", vec![]))],
            Router::new("sonnet"),
        );
        let task = orch.process("hello", &CancellationToken::new()).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, "handled: hello");
        assert_eq!(task.assigned_to, "sonnet");
        assert_eq!(task.category, TaskCategory::General);
        assert!(task.id.starts_with("task-"));
    }

    #[tokio::test]
    async fn test_process_unknown_agent_is_task_error() {
        let orch = Orchestrator::new(vec![], Router::new("missing"));
        let task = orch.process("hello", &CancellationToken::new()).await;
        assert!(task.is_error());
        assert_eq!(task.result, "Agent missing not found");
    }

    #[tokio::test]
    async fn test_process_agent_failure_is_task_error() {
        let orch = Orchestrator::new(
            vec![Arc::new(ScriptedAgent::failing("sonnet", "exit status 2"))],
            Router::new("sonnet"),
        );
        let task = orch.process("hello", &CancellationToken::new()).await;
        assert!(task.is_error());
        assert!(task.result.contains("exit status 2"));
    }

    #[tokio::test]
    async fn test_process_uses_classifier_and_routes() {
        let orch = Orchestrator::new(
            vec![
                Arc::new(ScriptedAgent::new("sonnet", vec![])),
                Arc::new(ScriptedAgent::new("gemini", vec![])),
            ],
            Router::new("sonnet"),
        );
        orch.set_route(TaskCategory::Ui, "gemini");

        let task = orch
            .process("make the button bigger", &CancellationToken::new())
            .await;
        assert_eq!(task.category, TaskCategory::Ui);
        assert_eq!(task.assigned_to, "gemini");

        let orch = orch.with_classifier(PassthroughClassifier);
        let task = orch
            .process("make the button bigger", &CancellationToken::new())
            .await;
        assert_eq!(task.assigned_to, "sonnet");
    }

    #[tokio::test]
    async fn test_stream_event_sequence() {
        let script = vec![
            StreamChunk::status("Starting..."),
            StreamChunk::thinking("considering"),
            StreamChunk::output("Hel"),
            StreamChunk::output("lo"),
            StreamChunk::status("Done").finished(),
        ];
        let orch = Arc::new(Orchestrator::new(
            vec![Arc::new(ScriptedAgent::new("sonnet", script))],
            Router::new("sonnet"),
        ));

        let (rx, handle) = orch.spawn_stream("hi", CancellationToken::new());
        let updates = collect(rx).await;

        let stages: Vec<Stage> = updates.iter().map(|u| u.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Routing,
                Stage::Routing,
                Stage::Processing,
                Stage::Streaming,
                Stage::Streaming,
                Stage::Streaming,
                Stage::Streaming,
                Stage::Streaming,
                Stage::Completed,
            ]
        );
        assert_eq!(updates[1].agent, "sonnet");

        let relayed: Vec<(ChunkKind, &str)> = updates
            .iter()
            .filter(|u| u.stage == Stage::Streaming)
            .map(|u| (u.kind, u.message.as_str()))
            .collect();
        assert_eq!(
            relayed,
            vec![
                (ChunkKind::Status, "Starting..."),
                (ChunkKind::Thinking, "considering"),
                (ChunkKind::Output, "Hel"),
                (ChunkKind::Output, "lo"),
                (ChunkKind::Status, "Done"),
            ]
        );

        // Exactly one terminal update, and it is last
        assert_eq!(updates.iter().filter(|u| u.done).count(), 1);
        assert!(updates.last().unwrap().done);

        let task = handle.await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, "Hello");
    }

    #[tokio::test]
    async fn test_stream_unknown_agent() {
        let orch = Arc::new(Orchestrator::new(vec![], Router::new("ghost")));
        let updates = collect(orch.process_stream("hi", CancellationToken::new())).await;

        assert_eq!(updates.len(), 3);
        let last = updates.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert_eq!(last.message, "Agent ghost not found");
        assert!(last.done);
    }

    #[tokio::test]
    async fn test_stream_agent_failure() {
        let orch = Arc::new(Orchestrator::new(
            vec![Arc::new(ScriptedAgent::failing("sonnet", "boom"))],
            Router::new("sonnet"),
        ));
        let updates = collect(orch.process_stream("hi", CancellationToken::new())).await;

        let last = updates.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert!(last.message.contains("boom"));
        assert_eq!(updates.iter().filter(|u| u.done).count(), 1);
    }

    #[tokio::test]
    async fn test_stream_cancellation_terminates() {
        let orch = Arc::new(Orchestrator::new(
            vec![Arc::new(HangingAgent)],
            Router::new("sonnet"),
        ));
        let cancel = CancellationToken::new();
        let (mut rx, handle) = orch.spawn_stream("hi", cancel.clone());

        // Wait until the agent's first fragment arrives, then cancel
        while let Some(update) = rx.recv().await {
            if update.kind == ChunkKind::Thinking {
                break;
            }
        }
        cancel.cancel();

        let rest = collect(rx).await;
        let last = rest.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert!(last.done);

        let task = handle.await.unwrap();
        assert!(task.is_error());
        assert!(task.result.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_from_config_tolerates_broken_agents() {
        let mut config = ConductorConfig::default();
        config.agents.insert(
            "gpt".to_string(),
            AgentSpec {
                kind: "openai".to_string(),
                model: "gpt-4o".to_string(),
                role: String::new(),
                options: HashMap::new(),
            },
        );

        let orch = Orchestrator::from_config(&config, &AgentFactory::new()).await;
        assert_eq!(orch.agent_names(), vec!["sonnet"]);

        let status = orch.agent_status();
        assert_eq!(status["sonnet"], "ready");
        assert_eq!(status["gpt"], "unavailable");
    }

    #[tokio::test]
    async fn test_agent_status_during_processing() {
        let agent = Arc::new(EchoAgent::new("sonnet").with_delay(std::time::Duration::from_millis(20)));
        let orch = Arc::new(Orchestrator::new(vec![agent], Router::new("sonnet")));

        let (mut rx, handle) = orch.spawn_stream("one two three", CancellationToken::new());
        let mut saw_processing = false;
        while let Some(update) = rx.recv().await {
            if update.kind == ChunkKind::Output && orch.agent_status()["sonnet"] == "processing" {
                saw_processing = true;
            }
        }
        handle.await.unwrap();
        assert!(saw_processing);
        assert_eq!(orch.agent_status()["sonnet"], "ready");
    }
}
