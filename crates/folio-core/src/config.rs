use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FolioError, Result};

/// Top-level configuration for the Folio agent service.
///
/// Loaded from `~/.folio/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
}

impl FolioConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FolioConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| FolioError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    ///
    /// This is the only place the agent reads the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("FOLIO_AGENT_MODEL").filter(|v| !v.trim().is_empty()) {
            self.agent.model = model;
        }
        if let Some(key) = lookup("FOLIO_LLM_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.agent.llm_api_key = Some(key);
        }
        if let Some(url) = lookup("FOLIO_LLM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.agent.llm_base_url = url;
        }
        if let Some(days) = lookup("FOLIO_TRASH_RETENTION_DAYS") {
            match days.trim().parse::<u32>() {
                Ok(days) => self.retention.trash_retention_days = days,
                Err(_) => warn!(value = %days, "Ignoring invalid FOLIO_TRASH_RETENTION_DAYS"),
            }
        }
        if let Some(port) = lookup("FOLIO_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.general.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid FOLIO_PORT"),
            }
        }
    }

    /// Fold the configuration into the options injected into agent components.
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            agent_model: self.agent.model.clone(),
            llm_api_key_present: self
                .agent
                .llm_api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty()),
            trash_retention_days: self.retention.trash_retention_days,
        }
    }
}

/// Options resolved once at the process boundary and passed to every
/// component that would otherwise consult the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    pub agent_model: String,
    pub llm_api_key_present: bool,
    pub trash_retention_days: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            agent_model: AgentConfig::default().model,
            llm_api_key_present: false,
            trash_retention_days: RetentionConfig::default().trash_retention_days,
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the API server.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.folio/data".to_string(),
            log_level: "info".to_string(),
            port: 7420,
        }
    }
}

/// Agent loop and language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Chat completion model name.
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub llm_base_url: String,
    /// API key. Usually supplied through `FOLIO_LLM_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,
    /// Request timeout for model calls.
    pub llm_timeout_secs: u64,
    /// Lifetime of approval tokens issued by the loop.
    pub approval_ttl_secs: u64,
    /// Hard cap on actions executed per loop run.
    pub max_actions_per_run: usize,
    /// Dispatch attempts per action (first try included).
    pub max_attempts: u32,
    /// Delay between dispatch attempts.
    pub retry_delay_ms: u64,
    /// Plan text longer than this is truncated when the model returns non-JSON.
    pub fallback_summary_chars: usize,
    #[serde(default)]
    pub context: ContextLimits,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: None,
            llm_timeout_secs: 60,
            approval_ttl_secs: 600,
            max_actions_per_run: 3,
            max_attempts: 2,
            retry_delay_ms: 250,
            fallback_summary_chars: 500,
            context: ContextLimits::default(),
        }
    }
}

/// How many memory entries of each kind feed the planning context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub recent: usize,
    pub short_term: usize,
    pub topic: usize,
    pub profile: usize,
    pub goals: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            recent: 10,
            short_term: 5,
            topic: 5,
            profile: 3,
            goals: 10,
        }
    }
}

/// Trash retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a soft-deleted page stays in the trash before it is purged.
    pub trash_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trash_retention_days: 30,
        }
    }
}

/// Cron expressions for the background jobs (5-field crontab syntax).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cadence_cron: String,
    pub retention_cron: String,
    pub planning_cron: String,
    pub patterns_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence_cron: "0 * * * *".to_string(),
            retention_cron: "0 3 * * *".to_string(),
            planning_cron: "0 8,14 * * *".to_string(),
            patterns_cron: "0 */6 * * *".to_string(),
        }
    }
}

/// Thresholds for the pattern rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Incoming `validates` edges before a hypothesis counts as converged.
    pub convergence_min_validations: usize,
    /// Days without update before an open question is stale.
    pub staleness_days: u32,
    /// Links between two domains before they are reported.
    pub cross_domain_min_links: usize,
    /// Age in days before an untested hypothesis is reported.
    pub untested_after_days: u32,
    /// Inbox size above which intake is gated.
    pub intake_max_inbox: usize,
    /// Attempts per workspace scan job.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_ms: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            convergence_min_validations: 3,
            staleness_days: 14,
            cross_domain_min_links: 2,
            untested_after_days: 7,
            intake_max_inbox: 20,
            max_attempts: 2,
            backoff_base_ms: 1000,
        }
    }
}
