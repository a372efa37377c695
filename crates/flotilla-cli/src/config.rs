use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use flotilla_coordination::CoordinatorConfig;
use flotilla_types::{AgentRegistration, ResourceRequirements};

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Top-level configuration for the flotilla binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlotillaConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Agents registered before the background loops start.
    #[serde(default = "default_initial_agents")]
    pub initial_agents: Vec<AgentRegistration>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_initial_agents() -> Vec<AgentRegistration> {
    ["agent-1", "agent-2"]
        .into_iter()
        .map(|id| {
            AgentRegistration::new(id)
                .with_capabilities(["general"])
                .with_requirements(ResourceRequirements::new(1.0, 1024, 2048, 50.0))
                .with_max_concurrent_tasks(4)
        })
        .collect()
}

impl Default for FlotillaConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            coordinator: CoordinatorConfig::default(),
            initial_agents: default_initial_agents(),
        }
    }
}

impl FlotillaConfig {
    /// Load and validate config from disk. Returns defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .coordinator
            .validate()
            .context("Invalid coordinator configuration")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}
