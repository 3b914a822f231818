use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::agents::config::AgentConfig;
use crate::agents::memory::MemoryConfig;
use crate::agents::orchestration::OrchestratorSettings;
use crate::agents::retrieval::{DEFAULT_SECTIONS, DEFAULT_WORD_LIMIT};

/// Prefix for environment overrides, e.g. `SWITCHBOARD__ORCHESTRATOR__KIND=react`
pub const ENV_PREFIX: &str = "SWITCHBOARD";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Paper corpus backing retrieval agents and the `search_by_paper` tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalSettings>,
}

/// Corpus loading settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalSettings {
    /// Directory of extracted `*.txt` papers
    pub corpus_dir: PathBuf,
    /// Section titles used for chunking
    #[serde(default = "default_sections")]
    pub sections: Vec<String>,
    #[serde(default = "default_word_limit")]
    pub word_limit: usize,
}

fn default_sections() -> Vec<String> {
    DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect()
}

fn default_word_limit() -> usize {
    DEFAULT_WORD_LIMIT
}

impl Settings {
    /// Load from a TOML file (optional) overlaid with `SWITCHBOARD__*` environment variables
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check agent configs and that every agent named by the orchestrator exists
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let mut errors = Vec::new();

        for (i, agent) in self.agents.iter().enumerate() {
            if let Err(e) = agent.validate() {
                errors.push(format!("agents[{}]: {}", i, e));
            }
            if self.agents[..i].iter().any(|a| a.name == agent.name) {
                errors.push(format!("agents[{}]: duplicate agent name '{}'", i, agent.name));
            }
        }

        let named = [
            ("default_agent", &self.orchestrator.default_agent),
            ("classifier_agent", &self.orchestrator.classifier_agent),
            ("planner_agent", &self.orchestrator.planner_agent),
        ];
        for (field, name) in named {
            if let Some(name) = name {
                if !self.agents.iter().any(|a| &a.name == name) {
                    errors.push(format!("orchestrator.{} '{}' is not a configured agent", field, name));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            ))
        }
    }
}
