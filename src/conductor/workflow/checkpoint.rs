// SPDX-License-Identifier: MIT

//! Checkpoint records and their on-disk store
//!
//! A checkpoint is a snapshot of a run's reporting state. Files are JSON,
//! named `<key>.checkpoint.json`, and written atomically: the record goes to
//! a temp file next to the target and is renamed into place.

use super::progress::{NodeState, RunReport};
use super::types::Workflow;
use crate::adk::error::CheckpointError;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";
pub const CHECKPOINT_DIR_NAME: &str = ".checkpoints";

/// Serializable snapshot of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_path: String,
    /// Row index of the node last being processed
    pub current_node: usize,
    pub node_states: Vec<NodeState>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub results: HashMap<String, Value>,
    #[serde(default)]
    pub output: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed_before: Duration,
}

impl Checkpoint {
    /// Cut a checkpoint from a report
    pub fn capture(workflow: &Workflow, workflow_path: Option<&Path>, report: &RunReport) -> Self {
        let saved_at = Utc::now();
        Self {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            workflow_path: workflow_path
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            current_node: report.current_node,
            node_states: report.nodes.clone(),
            variables: report.variables.clone(),
            results: report.results.clone(),
            output: report.output.clone(),
            saved_at,
            started_at: report.started_at,
            elapsed_before: report.elapsed(saved_at),
        }
    }

    /// File key: the workflow file's stem when the run came from a file,
    /// otherwise the workflow id
    pub fn key(&self) -> String {
        Path::new(&self.workflow_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.workflow_id.clone())
    }

    /// Marker appended to the output log on restore
    pub fn resume_marker(&self) -> String {
        format!(
            "\n[Resumed from checkpoint saved at {}]\n",
            self.saved_at.with_timezone(&Local).format("%H:%M:%S")
        )
    }

    pub fn completed_nodes(&self) -> usize {
        self.node_states
            .iter()
            .filter(|n| n.status == super::progress::NodeStatus::Completed)
            .count()
    }
}

/// Directory of checkpoint files
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store next to a workflow file, in its `.checkpoints` sibling directory
    pub fn for_workflow_file(workflow_path: &Path) -> Self {
        let parent = workflow_path.parent().unwrap_or_else(|| Path::new(""));
        Self::new(parent.join(CHECKPOINT_DIR_NAME))
    }

    /// Checkpoint path for a workflow file:
    /// `<dir>/.checkpoints/<stem>.checkpoint.json`
    pub fn path_for_workflow_file(workflow_path: &Path) -> PathBuf {
        let stem = workflow_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::for_workflow_file(workflow_path).path(&stem)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, CHECKPOINT_SUFFIX))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Write the checkpoint under its key. Nothing is replaced unless the
    /// whole record made it to disk.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let path = self.path(&checkpoint.key());
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let data = serde_json::to_vec_pretty(checkpoint).map_err(CheckpointError::Encode)?;
        let tmp = path.with_extension("json.tmp");
        let write = fs::write(&tmp, &data).and_then(|_| fs::rename(&tmp, &path));
        if let Err(source) = write {
            let _ = fs::remove_file(&tmp);
            return Err(CheckpointError::Write { path, source });
        }

        log::info!("Checkpoint saved to {}", path.display());
        Ok(path)
    }

    pub fn load(&self, key: &str) -> Result<Checkpoint, CheckpointError> {
        Self::load_path(&self.path(key))
    }

    pub fn load_path(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let data = fs::read(path).map_err(|source| CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| CheckpointError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Remove a checkpoint. Returns false if there was none.
    pub fn delete(&self, key: &str) -> Result<bool, CheckpointError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Deleted checkpoint {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Write { path, source }),
        }
    }

    /// Keys of all checkpoints in the store, sorted
    pub fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(CHECKPOINT_SUFFIX).map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::workflow::progress::NodeStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        Checkpoint {
            workflow_id: "wf-1".to_string(),
            workflow_name: "Review".to_string(),
            workflow_path: String::new(),
            current_node: 1,
            node_states: vec![
                NodeState {
                    id: "s".to_string(),
                    name: "Start".to_string(),
                    node_type: "start".to_string(),
                    status: NodeStatus::Completed,
                    output: String::new(),
                },
                NodeState {
                    id: "p".to_string(),
                    name: "Prompt".to_string(),
                    node_type: "prompt".to_string(),
                    status: NodeStatus::Running,
                    output: "Hel".to_string(),
                },
            ],
            variables: HashMap::from([("name".to_string(), json!("Alice"))]),
            results: HashMap::from([("s".to_string(), json!({"pending": true}))]),
            output: "Hel".to_string(),
            saved_at: Utc::now(),
            started_at: Some(Utc::now()),
            elapsed_before: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_path_for_workflow_file() {
        let path = CheckpointStore::path_for_workflow_file(Path::new("flows/review.json"));
        assert_eq!(path, PathBuf::from("flows/.checkpoints/review.checkpoint.json"));
    }

    #[test]
    fn test_key_prefers_file_stem() {
        let mut ck = sample();
        assert_eq!(ck.key(), "wf-1");
        ck.workflow_path = "flows/review.yaml".to_string();
        assert_eq!(ck.key(), "review");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested").join(".checkpoints"));
        let ck = sample();

        let path = store.save(&ck).unwrap();
        assert_eq!(path, store.path("wf-1"));
        assert!(store.exists("wf-1"));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = store.load("wf-1").unwrap();
        assert_eq!(loaded, ck);
        assert_eq!(store.list().unwrap(), vec!["wf-1"]);
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let first = sample();
        store.save(&first).unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir(store.path("wf-1").with_extension("json.tmp")).unwrap();
        let mut second = sample();
        second.output = "changed".to_string();
        let err = store.save(&second).unwrap_err();
        assert!(matches!(err, CheckpointError::Write { .. }));

        assert_eq!(store.load("wf-1").unwrap().output, "Hel");
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(
            store.load("missing").unwrap_err(),
            CheckpointError::Read { .. }
        ));

        fs::write(store.path("broken"), "{not json").unwrap();
        assert!(matches!(
            store.load("broken").unwrap_err(),
            CheckpointError::Decode { .. }
        ));
    }

    #[test]
    fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("none"));
        assert!(store.list().unwrap().is_empty());
        assert!(!store.delete("wf-1").unwrap());

        store.save(&sample()).unwrap();
        assert!(store.delete("wf-1").unwrap());
        assert!(!store.exists("wf-1"));
    }

    #[test]
    fn test_resume_marker_format() {
        let marker = sample().resume_marker();
        assert!(marker.starts_with("\n[Resumed from checkpoint saved at "));
        assert!(marker.ends_with("]\n"));
        // HH:MM:SS
        let time = &marker["\n[Resumed from checkpoint saved at ".len()..marker.len() - 2];
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);
    }
}
