//! Application configuration for AIBridge.
//!
//! User config lives at `~/.aibridge/aibridge.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AiBridgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "aibridge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".aibridge";

/// Template used when no prompt is configured for a source language.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Translate the following numbered lines into natural, fluent English.\n\
{count_info}\n\
Keep the numbering format of the source (1., 2., ...).\n\
{text}";

// ---------------------------------------------------------------------------
// Config structs (matching aibridge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Named automatic providers (`[providers.<name>]`).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Prompt templates: prompt type → source language → template.
    #[serde(default)]
    pub prompts: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "gemini".to_string(),
            ProviderConfig {
                name: "gemini".into(),
                backend: BackendKind::Gemini,
                model: "gemini-2.0-flash".into(),
                api_keys: Vec::new(),
                api_keys_env: Some("GEMINI_API_KEYS".into()),
                base_url: None,
                params: ModelParams::default(),
            },
        );

        let mut default_prompts = BTreeMap::new();
        default_prompts.insert("CN".to_string(), DEFAULT_PROMPT_TEMPLATE.to_string());
        let mut prompts = BTreeMap::new();
        prompts.insert(default_prompt_type(), default_prompts);

        Self {
            defaults: DefaultsConfig::default(),
            providers,
            prompts,
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Rows per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause before every batch after the first, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Root directory for checkpoint artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Prompt type used when none is given on the command line.
    #[serde(default = "default_prompt_type")]
    pub prompt_type: String,

    /// Network timeout for automatic provider calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            output_dir: default_output_dir(),
            prompt_type: default_prompt_type(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    3_000
}
fn default_output_dir() -> String {
    "~/Documents/AIBridge/Translated".into()
}
fn default_prompt_type() -> String {
    "default".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Network backend family. Selects the request/response adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Gemini,
    Grok,
    Perplexity,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Perplexity => "perplexity",
        }
    }
}

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    1.0
}
fn default_top_p() -> f32 {
    0.95
}
fn default_top_k() -> u32 {
    40
}
fn default_max_tokens() -> u32 {
    4096
}

/// `[providers.<name>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Filled from the table key when resolved through [`AppConfig::provider`].
    #[serde(skip)]
    pub name: String,

    pub backend: BackendKind,

    pub model: String,

    /// Inline credentials. Prefer `api_keys_env` for anything shared.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,

    /// Env var holding a comma-separated credential list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_keys_env: Option<String>,

    /// Endpoint override (proxies, self-hosted gateways, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(flatten)]
    pub params: ModelParams,
}

impl ProviderConfig {
    /// Resolve the credential pool: inline keys first, then env keys.
    /// Blank entries and duplicates are dropped.
    pub fn credentials(&self) -> Vec<String> {
        let from_env = self
            .api_keys_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default();

        let mut keys: Vec<String> = Vec::new();
        let candidates = self
            .api_keys
            .iter()
            .map(String::as_str)
            .chain(from_env.split(','));
        for key in candidates {
            let key = key.trim();
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }

    /// Fail with a config error when the provider cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(AiBridgeError::config(format!(
                "provider '{}' has no model configured",
                self.name
            )));
        }
        if self.credentials().is_empty() {
            let hint = self
                .api_keys_env
                .as_deref()
                .map(|var| format!(" Set the {var} environment variable or add api_keys."))
                .unwrap_or_default();
            return Err(AiBridgeError::config(format!(
                "no credentials configured for provider '{}'.{hint}",
                self.name
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Look up a provider by name, with its `name` field filled in.
    pub fn provider(&self, name: &str) -> Result<ProviderConfig> {
        let mut provider = self.providers.get(name).cloned().ok_or_else(|| {
            let known: Vec<&str> = self.providers.keys().map(String::as_str).collect();
            AiBridgeError::config(format!(
                "unknown provider '{name}' (configured: {})",
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })?;
        provider.name = name.to_string();
        Ok(provider)
    }

    /// Output root with a leading `~` expanded.
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.defaults.output_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.aibridge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AiBridgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.aibridge/aibridge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AiBridgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AiBridgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AiBridgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AiBridgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AiBridgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
