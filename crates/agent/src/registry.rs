use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use kh_domain::config::Config;

use crate::agent::{AgentDeps, ConversationAgent};

/// One [`ConversationAgent`] per group, created on first use.
pub struct AgentRegistry {
    config: Arc<Config>,
    deps: AgentDeps,
    agents: RwLock<HashMap<String, Arc<ConversationAgent>>>,
}

impl AgentRegistry {
    pub fn new(config: Arc<Config>, deps: AgentDeps) -> Self {
        Self {
            config,
            deps,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get_or_create(&self, group_id: &str) -> Arc<ConversationAgent> {
        if let Some(agent) = self.agents.read().get(group_id) {
            return Arc::clone(agent);
        }
        let mut agents = self.agents.write();
        let agent = agents.entry(group_id.to_owned()).or_insert_with(|| {
            tracing::info!(group_id, "creating agent");
            ConversationAgent::new(group_id, Arc::clone(&self.config), self.deps.clone())
        });
        Arc::clone(agent)
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<ConversationAgent>> {
        self.agents.read().get(group_id).cloned()
    }

    /// Drop the agent for `group_id`. A turn already running keeps its own
    /// handle and finishes normally.
    pub fn remove(&self, group_id: &str) -> Option<Arc<ConversationAgent>> {
        self.agents.write().remove(group_id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Known group ids, sorted.
    pub fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
