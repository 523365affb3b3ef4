//! Workflow loader - reads workflow definitions from a directory
//!
//! Files are JSON (as written by the workflow editor) or YAML, picked by
//! extension.

use super::types::Workflow;
use crate::adk::error::{ConductorError, Result, WorkflowError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Loads workflow definitions from a directory
pub struct WorkflowLoader {
    dir: PathBuf,
}

impl WorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names (file stems) of the workflows in the directory, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WorkflowError::FileNotFound(self.dir.display().to_string()).into()
            } else {
                ConductorError::Io(e)
            }
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || !has_workflow_extension(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Path a workflow name resolves to. A name without a known extension is
    /// tried as `.json`, then `.yaml`, then `.yml`.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let direct = self.dir.join(name);
        if has_workflow_extension(&direct) {
            return direct.is_file().then_some(direct);
        }
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
    }

    /// Load a workflow by name
    pub fn load(&self, name: &str) -> Result<Workflow> {
        let path = self.resolve(name).ok_or_else(|| {
            WorkflowError::FileNotFound(self.dir.join(name).display().to_string())
        })?;
        Self::load_file(&path)
    }

    /// Load a workflow from a file path
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Workflow> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WorkflowError::FileNotFound(path.display().to_string()).into()
            } else {
                ConductorError::Io(e)
            }
        })?;

        let parsed = if is_yaml(path) {
            Self::parse_yaml(&content)
        } else {
            Self::parse_json(&content)
        };
        let workflow = parsed.map_err(|e| WorkflowError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let starts = workflow.start_count();
        if starts > 1 {
            return Err(WorkflowError::Parse {
                path: path.display().to_string(),
                message: format!("expected at most one start node, found {}", starts),
            }
            .into());
        }
        log::debug!(
            "Loaded workflow '{}' ({} nodes) from {}",
            workflow.name,
            workflow.nodes.len(),
            path.display()
        );
        Ok(workflow)
    }

    /// Parse a workflow from a JSON string
    pub fn parse_json(content: &str) -> Result<Workflow> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a workflow from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Workflow> {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn has_workflow_extension(path: &Path) -> bool {
    extension(path).is_some_and(|e| EXTENSIONS.contains(&e.as_str()))
}

fn is_yaml(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("yaml" | "yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::workflow::types::node_types;
    use tempfile::TempDir;

    const JSON_FLOW: &str = r#"{
        "id": "review",
        "name": "Review",
        "version": "1.0.0",
        "nodes": [
            {"id": "s", "type": "start", "data": {"label": "Start"}},
            {"id": "p", "type": "prompt", "data": {"label": "Ask", "prompt": "Review {{file}}"}},
            {"id": "e", "type": "end", "data": {"label": "End"}}
        ],
        "connections": [
            {"id": "c1", "from": "s", "to": "p"},
            {"id": "c2", "from": "p", "to": "e"}
        ]
    }"#;

    const YAML_FLOW: &str = r#"
id: triage
name: Triage
version: "1.0.0"
nodes:
  - id: s
    type: start
  - id: q
    type: askUserQuestion
    data:
      label: Severity
      questionText: How bad is it?
      options:
        - low
        - label: high
          description: page someone
  - id: e
    type: end
connections:
  - from: s
    to: q
  - from: q
    to: e
"#;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("review.json"), JSON_FLOW).unwrap();
        fs::write(dir.path().join("triage.yaml"), YAML_FLOW).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join(".checkpoints")).unwrap();
        dir
    }

    #[test]
    fn test_list_workflows() {
        let dir = fixture();
        let loader = WorkflowLoader::new(dir.path());
        assert_eq!(loader.list().unwrap(), vec!["review", "triage"]);
    }

    #[test]
    fn test_list_missing_dir() {
        let loader = WorkflowLoader::new("/nonexistent/workflows");
        assert!(matches!(
            loader.list().unwrap_err(),
            ConductorError::Workflow(WorkflowError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_load_by_name_with_and_without_extension() {
        let dir = fixture();
        let loader = WorkflowLoader::new(dir.path());

        let wf = loader.load("review").unwrap();
        assert_eq!(wf.name, "Review");
        assert_eq!(wf.start_node().unwrap().id, "s");
        assert_eq!(wf.node("p").unwrap().data.prompt, "Review {{file}}");

        let wf = loader.load("review.json").unwrap();
        assert_eq!(wf.nodes.len(), 3);
    }

    #[test]
    fn test_load_yaml() {
        let dir = fixture();
        let loader = WorkflowLoader::new(dir.path());
        let wf = loader.load("triage").unwrap();

        let q = wf.node("q").unwrap();
        assert!(q.is_type(node_types::ASK_USER_QUESTION));
        assert_eq!(q.data.question_text, "How bad is it?");
        assert_eq!(q.option_labels(), vec!["low", "high"]);
        assert_eq!(wf.next_nodes("s")[0].id, "q");
    }

    #[test]
    fn test_load_missing() {
        let dir = fixture();
        let loader = WorkflowLoader::new(dir.path());
        let err = loader.load("nope").unwrap_err();
        assert!(matches!(
            err,
            ConductorError::Workflow(WorkflowError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_start_nodes_rejected() {
        let dir = fixture();
        let flow = r#"{
            "id": "twin",
            "nodes": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "start"}
            ]
        }"#;
        fs::write(dir.path().join("twin.json"), flow).unwrap();
        let loader = WorkflowLoader::new(dir.path());

        match loader.load("twin").unwrap_err() {
            ConductorError::Workflow(WorkflowError::Parse { path, message }) => {
                assert!(path.ends_with("twin.json"));
                assert!(message.contains("found 2"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = fixture();
        fs::write(dir.path().join("broken.json"), "{\"nodes\": 5}").unwrap();
        let loader = WorkflowLoader::new(dir.path());

        match loader.load("broken").unwrap_err() {
            ConductorError::Workflow(WorkflowError::Parse { path, .. }) => {
                assert!(path.ends_with("broken.json"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
