//! Fixed registry of workflow server configurations.
//!
//! The registry is read-only after construction; the supervisor owns all
//! runtime state. `module` is the primary key for every lookup.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::GlobalConfig;
use crate::supervisor::error::SupervisorError;

/// Configuration for a single workflow server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Human label, e.g. "Audio Generation"
    pub name: String,
    /// Workflow module loaded by the child server; unique key
    pub module: String,
    pub port: u16,
}

/// Built-in workflow list used when the config file defines none.
pub fn default_configs() -> Vec<WorkflowConfig> {
    vec![WorkflowConfig {
        name: "Audio Generation".to_string(),
        module: "published_nodes_workflow".to_string(),
        port: 8005,
    }]
}

pub struct WorkflowRegistry {
    configs: Vec<WorkflowConfig>,
}

impl WorkflowRegistry {
    /// Build a registry, validating that no two entries share a module key
    /// or a port. Two servers on one port would race for the bind and the
    /// loser would only surface as a health-check timeout, so this is
    /// rejected up front.
    pub fn new(configs: Vec<WorkflowConfig>) -> Result<Self, SupervisorError> {
        let mut modules: HashSet<&str> = HashSet::new();
        let mut ports: HashMap<u16, &str> = HashMap::new();

        for config in &configs {
            if config.port == 0 {
                return Err(SupervisorError::InvalidPort(config.module.clone()));
            }
            if !modules.insert(config.module.as_str()) {
                return Err(SupervisorError::DuplicateModule(config.module.clone()));
            }
            if let Some(first) = ports.insert(config.port, config.module.as_str()) {
                return Err(SupervisorError::DuplicatePort {
                    port: config.port,
                    first: first.to_string(),
                    second: config.module.clone(),
                });
            }
        }

        Ok(Self { configs })
    }

    /// Registry from the global config, falling back to the built-in list.
    pub fn from_config(cfg: &GlobalConfig) -> Result<Self, SupervisorError> {
        let configs = cfg.servers.clone().unwrap_or_else(default_configs);
        Self::new(configs)
    }

    /// All configured servers, in registry (startup) order.
    pub fn configs(&self) -> &[WorkflowConfig] {
        &self.configs
    }

    /// Port for a workflow module; absent is not an error.
    pub fn port_for(&self, module: &str) -> Option<u16> {
        self.config_for(module).map(|c| c.port)
    }

    pub fn config_for(&self, module: &str) -> Option<&WorkflowConfig> {
        self.configs.iter().find(|c| c.module == module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(module: &str, port: u16) -> WorkflowConfig {
        WorkflowConfig {
            name: module.to_string(),
            module: module.to_string(),
            port,
        }
    }

    #[test]
    fn test_port_lookup() {
        let registry = WorkflowRegistry::new(default_configs()).unwrap();
        assert_eq!(registry.port_for("published_nodes_workflow"), Some(8005));
        assert_eq!(registry.port_for("unknown_module"), None);
    }

    #[test]
    fn test_config_lookup() {
        let registry = WorkflowRegistry::new(default_configs()).unwrap();
        let cfg = registry.config_for("published_nodes_workflow").unwrap();
        assert_eq!(cfg.name, "Audio Generation");
        assert!(registry.config_for("ghost").is_none());
    }

    #[test]
    fn test_startup_order_is_preserved() {
        let registry = WorkflowRegistry::new(vec![
            config("c", 9003),
            config("a", 9001),
            config("b", 9002),
        ])
        .unwrap();

        let modules: Vec<&str> = registry.configs().iter().map(|c| c.module.as_str()).collect();
        assert_eq!(modules, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let result = WorkflowRegistry::new(vec![config("audio", 9001), config("audio", 9002)]);
        assert!(matches!(result, Err(SupervisorError::DuplicateModule(m)) if m == "audio"));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let result = WorkflowRegistry::new(vec![config("audio", 9001), config("video", 9001)]);
        match result {
            Err(SupervisorError::DuplicatePort { port, first, second }) => {
                assert_eq!(port, 9001);
                assert_eq!(first, "audio");
                assert_eq!(second, "video");
            }
            other => panic!("expected DuplicatePort, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_zero_port_rejected() {
        let result = WorkflowRegistry::new(vec![config("audio", 0)]);
        assert!(matches!(result, Err(SupervisorError::InvalidPort(_))));
    }

    #[test]
    fn test_empty_registry_is_valid() {
        let registry = WorkflowRegistry::new(Vec::new()).unwrap();
        assert!(registry.configs().is_empty());
    }
}
