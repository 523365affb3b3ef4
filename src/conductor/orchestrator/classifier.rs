// SPDX-License-Identifier: MIT

//! Task classification
//!
//! A classifier maps free text to a [`TaskCategory`]. Classification is pure
//! and total: it never fails and never blocks.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    #[default]
    General,
    Ui,
    Design,
    Debug,
    Code,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::General,
        TaskCategory::Ui,
        TaskCategory::Design,
        TaskCategory::Debug,
        TaskCategory::Code,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::General => "general",
            TaskCategory::Ui => "ui",
            TaskCategory::Design => "design",
            TaskCategory::Debug => "debug",
            TaskCategory::Code => "code",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps request text to a category
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &str) -> TaskCategory;
}

/// Sends everything to `General`, leaving all judgment to the agent
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughClassifier;

impl Classifier for PassthroughClassifier {
    fn classify(&self, _input: &str) -> TaskCategory {
        TaskCategory::General
    }
}

/// One keyword rule: any keyword hit selects the category
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub category: TaskCategory,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(category: TaskCategory, keywords: &[&str]) -> Self {
        Self {
            category,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|kw| lowered.contains(kw.as_str()))
    }
}

static DEFAULT_RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| {
    vec![
        KeywordRule::new(
            TaskCategory::Ui,
            &[
                "ui", "ux", "frontend", "component", "button", "form", "layout", "style",
                "css", "design", "화면", "디자인", "컴포넌트", "프론트",
            ],
        ),
        KeywordRule::new(
            TaskCategory::Design,
            &[
                "architecture", "structure", "refactor", "pattern", "설계", "아키텍처", "구조",
                "리팩토링",
            ],
        ),
        KeywordRule::new(
            TaskCategory::Debug,
            &[
                "bug", "error", "fix", "debug", "issue", "problem", "버그", "에러", "오류",
                "수정", "디버그",
            ],
        ),
    ]
});

/// Case-insensitive substring matching over an ordered rule list.
/// The first rule with a hit wins; no hit means `General`.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.clone())
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, input: &str) -> TaskCategory {
        let lowered = input.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.category)
            .unwrap_or_default()
    }
}
