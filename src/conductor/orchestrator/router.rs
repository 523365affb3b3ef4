use super::classifier::TaskCategory;
use std::collections::HashMap;

/// Maps task categories to agent names.
///
/// Routing never fails: categories without an explicit route resolve to the
/// default agent.
#[derive(Debug, Clone)]
pub struct Router {
    default_agent: String,
    routes: HashMap<TaskCategory, String>,
}

impl Router {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            default_agent: default_agent.into(),
            routes: HashMap::new(),
        }
    }

    pub fn with_routes(
        default_agent: impl Into<String>,
        routes: HashMap<TaskCategory, String>,
    ) -> Self {
        Self {
            default_agent: default_agent.into(),
            routes,
        }
    }

    pub fn route(&self, category: TaskCategory) -> &str {
        self.routes
            .get(&category)
            .map(String::as_str)
            .unwrap_or(&self.default_agent)
    }

    pub fn set_route(&mut self, category: TaskCategory, agent_name: impl Into<String>) {
        self.routes.insert(category, agent_name.into());
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Copy of the explicit routes; changing it does not affect the router
    pub fn routes(&self) -> HashMap<TaskCategory, String> {
        self.routes.clone()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new("sonnet")
    }
}
