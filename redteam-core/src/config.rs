use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{OrchestratorError, Result};

/// Which attacker system prompt the strategy surface uses (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrategyConfig {
    Crescendo {
        #[serde(default)]
        purpose: Option<String>,
        #[serde(default)]
        goal: String,
    },
    Custom {
        #[serde(default)]
        strategy_text: String,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Crescendo {
            purpose: None,
            goal: String::new(),
        }
    }
}

fn default_max_turns() -> u32 {
    10
}

fn default_max_backtracks() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_output_path() -> PathBuf {
    PathBuf::from("redteam_results.jsonl")
}

/// Recognized options from §6.5 of the specification, plus the ambient
/// knobs (timeouts, output path) a deployable binary needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Key under which the objective lives in `vars`.
    #[serde(default)]
    pub inject_var: String,

    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Hard cap on attacker turns. `maxTurns` wins over `maxRounds` if both
    /// are present in the source document; this struct only exposes the
    /// resolved field.
    #[serde(default = "default_max_turns", alias = "max_rounds")]
    pub max_turns: u32,

    #[serde(default = "default_max_backtracks")]
    pub max_backtracks: u32,

    #[serde(default)]
    pub stateful: bool,

    #[serde(default)]
    pub continue_after_success: bool,

    /// Attacker/scorer provider id or descriptor; `None` resolves via the
    /// provider manager's defaults (§4.1).
    #[serde(default)]
    pub redteam_provider: Option<String>,

    #[serde(default)]
    pub per_turn_layers: Vec<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inject_var: String::new(),
            strategy: StrategyConfig::default(),
            max_turns: default_max_turns(),
            max_backtracks: default_max_backtracks(),
            stateful: false,
            continue_after_success: false,
            redteam_provider: None,
            per_turn_layers: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            output_path: default_output_path(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file, writing a default file if none exists yet —
    /// mirrors the host-crate JSON config's create-on-`NotFound` behavior.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let config_str = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let default_config = Self::default();
                let default_str = toml::to_string_pretty(&default_config)
                    .map_err(|e| OrchestratorError::Configuration(e.to_string()))?;
                fs::write(path, &default_str).await?;
                default_str
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = toml::from_str(&config_str)
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Constructor-time validation (`configuration-error` per §7): rejects
    /// an empty `strategyText` for the Custom variant and an unset
    /// `injectVar`.
    pub fn validate(&self) -> Result<()> {
        if self.inject_var.is_empty() {
            return Err(OrchestratorError::Configuration(
                "injectVar is required".into(),
            ));
        }
        if let StrategyConfig::Custom { strategy_text } = &self.strategy {
            if strategy_text.trim().is_empty() {
                return Err(OrchestratorError::Configuration(
                    "strategyText must not be empty for the Custom strategy".into(),
                ));
            }
        }
        Ok(())
    }
}
