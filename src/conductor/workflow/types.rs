// SPDX-License-Identifier: MIT

//! Workflow graph type definitions
//!
//! A [`Workflow`] is built once by the loader (or by the host directly) and
//! is read-only for the rest of the run.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Built-in node type tags
pub mod node_types {
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const PROMPT: &str = "prompt";
    pub const ASK_USER_QUESTION: &str = "askUserQuestion";
}

/// Editor canvas position; carried through but unused by execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// An answer option: either a bare label or a record carrying one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionOption {
    Label(String),
    Record {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl QuestionOption {
    pub fn label(&self) -> &str {
        match self {
            QuestionOption::Label(label) => label,
            QuestionOption::Record { label, .. } => label,
        }
    }
}

impl From<&str> for QuestionOption {
    fn from(label: &str) -> Self {
        QuestionOption::Label(label.to_string())
    }
}

/// Type-specific node payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    /// `prompt`: template with `{{variable}}` placeholders
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, serde_json::Value>,
    /// `askUserQuestion`: question shown to the user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuestionOption>,
}

/// A node in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: String::new(),
            position: Position::default(),
            data: NodeData::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = label.into();
        self
    }

    /// Shorthand for a `prompt` node
    pub fn prompt(id: impl Into<String>, template: impl Into<String>) -> Self {
        let mut node = Self::new(id, node_types::PROMPT);
        node.data.prompt = template.into();
        node
    }

    /// Shorthand for an `askUserQuestion` node
    pub fn question(id: impl Into<String>, text: impl Into<String>, options: &[&str]) -> Self {
        let mut node = Self::new(id, node_types::ASK_USER_QUESTION);
        node.data.question_text = text.into();
        node.data.options = options.iter().map(|o| QuestionOption::from(*o)).collect();
        node
    }

    /// Label for display, falling back to the node type
    pub fn display_name(&self) -> &str {
        if !self.data.label.is_empty() {
            &self.data.label
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.node_type
        }
    }

    pub fn is_type(&self, node_type: &str) -> bool {
        self.node_type == node_type
    }

    /// Option labels as plain strings
    pub fn option_labels(&self) -> Vec<String> {
        self.data
            .options
            .iter()
            .map(|o| o.label().to_string())
            .collect()
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_port: String,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
            ..Default::default()
        }
    }
}

/// A named, versioned graph of nodes and connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.connections.push(Connection::new(from, to));
        self
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_type(node_types::START))
    }

    /// Number of `start` nodes; a well-formed graph has at most one
    pub fn start_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_type(node_types::START))
            .count()
    }

    pub fn end_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_type(node_types::END))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Connections leaving `id`, in connection order
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.from == id)
    }

    /// Successor nodes of `id`, in connection order. Connections pointing at
    /// unknown node ids are skipped.
    pub fn next_nodes(&self, id: &str) -> Vec<&Node> {
        self.outgoing(id)
            .filter_map(|c| self.node(&c.to))
            .collect()
    }

    /// Nodes reachable from start, each listed once, in depth-first
    /// pre-order. This is the row order of the node-status table.
    pub fn display_order(&self) -> Vec<&Node> {
        let mut order = Vec::new();
        let Some(start) = self.start_node() else {
            return order;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id.as_str()) {
                continue;
            }
            order.push(node);
            for next in self.next_nodes(&node.id).into_iter().rev() {
                if !visited.contains(next.id.as_str()) {
                    stack.push(next);
                }
            }
        }
        order
    }
}
