//! Configuration loading, validation, and management for Loresmith.
//!
//! Loads configuration from `~/.loresmith/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use loresmith_core::PersonaKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Workflow steps that the routing table may name.
pub const ROUTED_STEPS: [&str; 5] = ["decomposition", "evaluation", "refinement", "answer", "combination"];

/// Provider-specific API key environment variables, checked by [`AppConfig::load`].
const PROVIDER_KEY_VARS: [(&str, &str); 5] = [
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("groq", "GROQ_API_KEY"),
];

/// The root configuration structure.
///
/// Maps directly to `~/.loresmith/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used for the response step unless the caller picks another
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used for the response step
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Step → tier → backend routing
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Retrieval backend configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query workflow limits
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Persona used when the caller does not pick one
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Conversation history persistence
    #[serde(default)]
    pub history: HistoryConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("routing", &self.routing)
            .field("retrieval", &self.retrieval)
            .field("workflow", &self.workflow)
            .field("persona", &self.persona)
            .field("history", &self.history)
            .field("gateway", &self.gateway)
            .field("logging", &self.logging)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Which backend each reasoning step runs on.
///
/// `steps` names a tier per step; `tiers` says which provider and model
/// a tier means. The response step is never routed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_steps")]
    pub steps: BTreeMap<String, String>,

    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, TierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub provider: String,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl TierConfig {
    fn new(provider: &str, model: &str, temperature: Option<f32>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature,
        }
    }
}

fn default_steps() -> BTreeMap<String, String> {
    [
        ("decomposition", "reasoning"),
        ("evaluation", "fast"),
        ("refinement", "rewrite"),
        ("answer", "economy"),
        ("combination", "fast"),
    ]
    .into_iter()
    .map(|(step, tier)| (step.to_string(), tier.to_string()))
    .collect()
}

fn default_tiers() -> BTreeMap<String, TierConfig> {
    BTreeMap::from([
        (
            "reasoning".to_string(),
            TierConfig::new("anthropic", "claude-3-5-sonnet-latest", Some(0.2)),
        ),
        (
            "fast".to_string(),
            TierConfig::new("anthropic", "claude-3-5-haiku-latest", Some(0.0)),
        ),
        (
            "rewrite".to_string(),
            TierConfig::new("deepseek", "deepseek-chat", Some(0.3)),
        ),
        (
            "economy".to_string(),
            TierConfig::new("openai", "gpt-4o-mini", Some(0.3)),
        ),
    ])
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            tiers: default_tiers(),
        }
    }
}

impl RoutingConfig {
    /// The tier configuration a step resolves to, if the step is routed.
    pub fn tier_for(&self, step: &str) -> Option<(&str, &TierConfig)> {
        let tier = self.steps.get(step)?;
        self.tiers.get(tier).map(|cfg| (tier.as_str(), cfg))
    }
}

// ── Retrieval / workflow / persona / history ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// "keyword" or "none"
    #[serde(default = "default_retrieval_backend")]
    pub backend: String,

    /// JSON/JSONL file or directory of .md/.txt documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum characters per chunk when splitting documents
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_retrieval_backend() -> String {
    "keyword".into()
}
fn default_top_k() -> usize {
    4
}
fn default_chunk_size() -> usize {
    800
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            corpus_path: None,
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Ceiling on concurrent subqueries per turn
    #[serde(default = "default_max_subqueries")]
    pub max_subqueries: usize,

    /// Turn deadline for subquery resolution; 0 disables it
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,

    /// Prior messages passed to the response step
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_subqueries() -> usize {
    5
}
fn default_turn_timeout() -> u64 {
    120
}
fn default_max_history() -> usize {
    10
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_subqueries: default_max_subqueries(),
            turn_timeout_secs: default_turn_timeout(),
            max_history: default_max_history(),
        }
    }
}

impl WorkflowConfig {
    pub fn turn_timeout(&self) -> Option<std::time::Duration> {
        (self.turn_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.turn_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona")]
    pub default: String,
}

fn default_persona() -> String {
    "scribe".into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default: default_persona(),
        }
    }
}

impl PersonaConfig {
    pub fn kind(&self) -> Result<PersonaKind, ConfigError> {
        self.default.parse().map_err(ConfigError::ValidationError)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// "memory" or "file"
    #[serde(default = "default_history_backend")]
    pub backend: String,

    /// Directory for per-thread files (file backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_history_backend() -> String {
    "memory".into()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.loresmith/config.toml).
    ///
    /// Environment overrides:
    /// - `LORESMITH_API_KEY`, then the default provider's own key variable
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, ... fill per-provider keys
    /// - `LORESMITH_PROVIDER`, `LORESMITH_MODEL`, `LORESMITH_CORPUS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(provider) = std::env::var("LORESMITH_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("LORESMITH_MODEL") {
            config.default_model = model;
        }

        if let Ok(corpus) = std::env::var("LORESMITH_CORPUS") {
            config.retrieval.corpus_path = Some(corpus);
        }

        for (provider, var) in PROVIDER_KEY_VARS {
            if let Ok(key) = std::env::var(var) {
                let entry = config.providers.entry(provider.to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }

        if config.api_key.is_none() {
            config.api_key = std::env::var("LORESMITH_API_KEY")
                .ok()
                .or_else(|| config.provider_key(&config.default_provider));
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".loresmith")
    }

    /// Directory used by the file history backend when no path is set.
    pub fn history_dir(&self) -> PathBuf {
        self.history
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("threads"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(1..=10).contains(&self.workflow.max_subqueries) {
            return Err(ConfigError::ValidationError(
                "workflow.max_subqueries must be between 1 and 10".into(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }

        if !matches!(self.retrieval.backend.as_str(), "keyword" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "Unknown retrieval backend '{}'. Options: keyword, none",
                self.retrieval.backend
            )));
        }

        if !matches!(self.history.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "Unknown history backend '{}'. Options: memory, file",
                self.history.backend
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log format '{}'. Options: pretty, json",
                self.logging.format
            )));
        }

        self.persona.kind()?;

        for (step, tier) in &self.routing.steps {
            if !ROUTED_STEPS.contains(&step.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "routing.steps: '{step}' is not a routable step"
                )));
            }
            let Some(tier_cfg) = self.routing.tiers.get(tier) else {
                return Err(ConfigError::ValidationError(format!(
                    "routing.steps.{step} names undefined tier '{tier}'"
                )));
            };
            if let Some(t) = tier_cfg.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "routing.tiers.{tier}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }
        }

        Ok(())
    }

    /// API key for a named provider: its own entry first, then the global key
    /// when that provider is the default one.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.provider_key(provider).or_else(|| {
            (provider == self.default_provider)
                .then(|| self.api_key.clone())
                .flatten()
        })
    }

    fn provider_key(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|p| p.api_key.clone())
    }

    /// Check if an API key is available for the default provider.
    pub fn has_api_key(&self) -> bool {
        self.api_key_for(&self.default_provider).is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            routing: RoutingConfig::default(),
            retrieval: RetrievalConfig::default(),
            workflow: WorkflowConfig::default(),
            persona: PersonaConfig::default(),
            history: HistoryConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.workflow.max_subqueries, 5);
        assert_eq!(config.retrieval.top_k, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_routing_covers_every_step() {
        let routing = RoutingConfig::default();
        for step in ROUTED_STEPS {
            assert!(routing.tier_for(step).is_some(), "{step} is unrouted");
        }
        let (tier, cfg) = routing.tier_for("decomposition").unwrap();
        assert_eq!(tier, "reasoning");
        assert_eq!(cfg.provider, "anthropic");
        assert!(routing.tier_for("response").is_none());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.routing.steps, config.routing.steps);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fan_out_cap_is_bounded() {
        let mut config = AppConfig::default();
        config.workflow.max_subqueries = 0;
        assert!(config.validate().is_err());
        config.workflow.max_subqueries = 11;
        assert!(config.validate().is_err());
        config.workflow.max_subqueries = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn step_with_undefined_tier_rejected() {
        let mut config = AppConfig::default();
        config.routing.steps.insert("answer".into(), "platinum".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("platinum"));
    }

    #[test]
    fn response_step_cannot_be_routed() {
        let mut config = AppConfig::default();
        config.routing.steps.insert("response".into(), "fast".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_kinds_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.backend = "faiss".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.persona.default = "bard".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.history.backend = "redis".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_provider = "anthropic"

[workflow]
max_subqueries = 3

[routing.tiers.fast]
provider = "openai"
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.workflow.max_subqueries, 3);
        assert_eq!(config.workflow.max_history, 10);
        // Replacing the tier table drops the other default tiers.
        assert!(config.routing.tiers.contains_key("fast"));
        assert!(!config.routing.tiers.contains_key("reasoning"));
    }

    #[test]
    fn file_with_unroutable_steps_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[routing.tiers.fast]
provider = "openai"
model = "gpt-4o-mini"
"#,
        )
        .unwrap();
        // Default steps still name "reasoning", which this file removed.
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn api_key_resolution_prefers_provider_entry() {
        let mut config = AppConfig {
            api_key: Some("global".into()),
            ..AppConfig::default()
        };
        assert_eq!(config.api_key_for("openai").as_deref(), Some("global"));
        assert_eq!(config.api_key_for("anthropic"), None);

        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant".into()),
                ..Default::default()
            },
        );
        assert_eq!(config.api_key_for("anthropic").as_deref(), Some("sk-ant"));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn turn_timeout_zero_disables_deadline() {
        let mut workflow = WorkflowConfig::default();
        assert_eq!(workflow.turn_timeout(), Some(std::time::Duration::from_secs(120)));
        workflow.turn_timeout_secs = 0;
        assert!(workflow.turn_timeout().is_none());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("[routing.tiers.reasoning]"));
        assert!(toml_str.contains("max_subqueries"));
    }
}
