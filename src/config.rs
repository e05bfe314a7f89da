use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::memory::EngineOptions;
use crate::memory::anchor::{DEFAULT_MAX_PRIORITY, DEFAULT_REINFORCE_AMOUNT, DEFAULT_WEAKEN_FACTOR};
use crate::memory::clock::SystemClock;
use crate::memory::dreaming::DreamParams;
use crate::memory::text::{Category, Taxonomy};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MaatConfig {
    pub agent: AgentDefConfig,
    pub memory: MemoryConfig,
    pub dream: DreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for AgentDefConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "openai-compatible".into()
}
fn default_base_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_model() -> String {
    "local".into()
}
fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
    /// Multiplier applied to every episodic priority once per turn.
    #[serde(default = "default_episodic_decay")]
    pub episodic_decay: f64,
    #[serde(default = "default_max_priority")]
    pub max_priority: f64,
    #[serde(default = "default_reinforce_amount")]
    pub reinforce_amount: f64,
    #[serde(default = "default_weaken_factor")]
    pub weaken_factor: f64,
    /// Replaces the built-in taxonomy when set. Order is the tie-break.
    pub categories: Option<Vec<Category>>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            recall_limit: default_recall_limit(),
            episodic_decay: default_episodic_decay(),
            max_priority: default_max_priority(),
            reinforce_amount: default_reinforce_amount(),
            weaken_factor: default_weaken_factor(),
            categories: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    maat_home().join("data")
}
fn default_recall_limit() -> usize {
    5
}
fn default_episodic_decay() -> f64 {
    0.995
}
fn default_max_priority() -> f64 {
    DEFAULT_MAX_PRIORITY
}
fn default_reinforce_amount() -> f64 {
    DEFAULT_REINFORCE_AMOUNT
}
fn default_weaken_factor() -> f64 {
    DEFAULT_WEAKEN_FACTOR
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DreamConfig {
    pub hours_back: u32,
    pub max_episodes: usize,
    pub decay_factor: f64,
    pub delete_threshold: f64,
    pub retention_days: u32,
    /// Minutes between background cycles during `maat chat`; 0 turns the
    /// scheduler off.
    pub interval_minutes: u64,
    pub backup_dir: Option<PathBuf>,
}

impl Default for DreamConfig {
    fn default() -> Self {
        let params = DreamParams::default();
        Self {
            hours_back: params.hours_back,
            max_episodes: params.max_episodes,
            decay_factor: params.decay_factor,
            delete_threshold: params.delete_threshold,
            retention_days: params.retention_days,
            interval_minutes: 0,
            backup_dir: None,
        }
    }
}

impl DreamConfig {
    pub fn to_params(&self) -> DreamParams {
        DreamParams {
            hours_back: self.hours_back,
            max_episodes: self.max_episodes,
            decay_factor: self.decay_factor,
            delete_threshold: self.delete_threshold,
            retention_days: self.retention_days,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_minutes > 0).then(|| Duration::from_secs(self.interval_minutes * 60))
    }

    /// Where `/backup` writes; defaults next to the data directory.
    pub fn backup_dir_or(&self, memory: &MemoryConfig) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| memory.data_dir.join("backups"))
    }
}

impl MaatConfig {
    /// Engine options derived from the `[memory]` section.
    pub fn engine_options(&self) -> EngineOptions {
        let taxonomy = match &self.memory.categories {
            Some(categories) => Taxonomy::new(categories.clone()),
            None => Taxonomy::default(),
        };
        EngineOptions {
            clock: Arc::new(SystemClock),
            taxonomy,
            max_priority: self.memory.max_priority,
        }
    }
}

fn maat_home() -> PathBuf {
    crate::fs_util::home_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".maat")
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `MAAT_CONFIG` env var
/// 2. `~/.maat/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<MaatConfig> {
    let path = config_path();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config = parse(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
        info!("loaded config from {}", path.display());
        config
    } else {
        info!("no config file found, using zero-config defaults");
        MaatConfig::default()
    };

    resolve_api_key(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Parse TOML text without touching the environment.
pub fn parse(content: &str) -> anyhow::Result<MaatConfig> {
    Ok(toml::from_str(content)?)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MAAT_CONFIG") {
        return PathBuf::from(path);
    }
    maat_home().join("config.toml")
}

fn resolve_api_key(config: &mut MaatConfig) {
    if config.agent.api_key.is_none() {
        config.agent.api_key = std::env::var("MAAT_API_KEY").ok().filter(|k| !k.is_empty());
    }
}

fn check_unit_factor(name: &str, value: f64) -> anyhow::Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        anyhow::bail!("{name} must be in (0, 1], got {value}");
    }
    Ok(())
}

/// Validate the config and return clear error messages.
pub fn validate(config: &MaatConfig) -> anyhow::Result<()> {
    let valid_providers = ["openai-compatible"];
    if !valid_providers.contains(&config.agent.provider.as_str()) {
        anyhow::bail!(
            "invalid provider '{}': must be one of {:?}",
            config.agent.provider,
            valid_providers
        );
    }

    if config.agent.max_tokens == 0 {
        anyhow::bail!("agent.max_tokens must be > 0");
    }

    check_unit_factor("memory.episodic_decay", config.memory.episodic_decay)?;
    check_unit_factor("memory.weaken_factor", config.memory.weaken_factor)?;
    check_unit_factor("dream.decay_factor", config.dream.decay_factor)?;

    if !(config.memory.max_priority.is_finite() && config.memory.max_priority > 0.0) {
        anyhow::bail!("memory.max_priority must be > 0");
    }
    if !(config.memory.reinforce_amount.is_finite() && config.memory.reinforce_amount > 0.0) {
        anyhow::bail!("memory.reinforce_amount must be > 0");
    }
    if !(config.dream.delete_threshold.is_finite() && config.dream.delete_threshold >= 0.0) {
        anyhow::bail!("dream.delete_threshold must be >= 0");
    }

    if let Some(categories) = &config.memory.categories {
        for (i, category) in categories.iter().enumerate() {
            if category.name.trim().is_empty() {
                anyhow::bail!("memory.categories[{i}] must have a name");
            }
        }
    }

    Ok(())
}
