use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::llm::Provider;
use crate::session::engine::EngineConfig;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load from a YAML file, expanding `${VAR}` references first.
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Absolute session length; the expiry deadline is fixed at creation.
    #[serde(default = "default_length_minutes")]
    pub length_minutes: u64,
    /// Quiet period after the last operator message before a turn starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Operator silence before the persona nudges once on its own.
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
    #[serde(default = "default_buffer_cap")]
    pub buffer_cap: usize,
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    #[serde(default = "default_max_drain_iterations")]
    pub max_drain_iterations: u32,
    #[serde(default = "default_typing_ms_per_char")]
    pub typing_ms_per_char: u64,
    #[serde(default = "default_typing_max_ms")]
    pub typing_max_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            length_minutes: default_length_minutes(),
            debounce_ms: default_debounce_ms(),
            inactivity_secs: default_inactivity_secs(),
            buffer_cap: default_buffer_cap(),
            lock_wait_secs: default_lock_wait_secs(),
            max_drain_iterations: default_max_drain_iterations(),
            typing_ms_per_char: default_typing_ms_per_char(),
            typing_max_ms: default_typing_max_ms(),
        }
    }
}

impl SessionConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            inactivity: Duration::from_secs(self.inactivity_secs),
            session_length: Duration::from_secs(self.length_minutes * 60),
            buffer_cap: self.buffer_cap,
            lock_wait: Duration::from_secs(self.lock_wait_secs),
            max_drain_iterations: self.max_drain_iterations,
            typing_ms_per_char: self.typing_ms_per_char,
            typing_max_ms: self.typing_max_ms,
        }
    }
}

// ============================================================================
// PersonaConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Inline persona system prompt; takes precedence over `prompt_path`.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            stage_timeout_secs: default_stage_timeout_secs(),
            max_tokens: default_max_tokens(),
            prompt: None,
            prompt_path: None,
        }
    }
}

/// Fallback persona when no prompt is configured.
pub const DEFAULT_PERSONA_PROMPT: &str = "\
You are playing a patient in a simulated support conversation. Stay in \
character at all times, speak in the first person, and never reveal that \
you are simulated.";

impl PersonaConfig {
    pub async fn load_prompt(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        if let Some(path) = &self.prompt_path {
            return Ok(fs::read_to_string(path).await?);
        }
        Ok(DEFAULT_PERSONA_PROMPT.to_string())
    }
}

// ============================================================================
// QuotaConfig / StorageConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QuotaConfig {
    /// Sessions each user may open before needing bonus units.
    #[serde(default = "default_free_units")]
    pub free_units: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_units: default_free_units(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory for durable session records; in-memory storage when unset.
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    256
}

fn default_length_minutes() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    4_000
}

fn default_inactivity_secs() -> u64 {
    90
}

fn default_buffer_cap() -> usize {
    5
}

fn default_lock_wait_secs() -> u64 {
    5
}

fn default_max_drain_iterations() -> u32 {
    8
}

fn default_typing_ms_per_char() -> u64 {
    40
}

fn default_typing_max_ms() -> u64 {
    4_000
}

fn default_provider() -> Provider {
    Provider::Anthropic
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_stage_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_free_units() -> u32 {
    3
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Shell-compatible syntax:
/// - `${VAR}` - required, errors if not set
/// - `${VAR:-default}` - default when unset (empty default allowed)
/// - `$$` - literal `$`; a plain `$` not followed by `{` stays literal
///
/// No nested expansion; an unclosed `${` is an error.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('{') {
            let end = tail.find('}').ok_or(ConfigError::UnclosedVarReference)?;
            out.push_str(&resolve_var(&tail[..end])?);
            rest = &tail[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve the inside of a `${...}` reference.
fn resolve_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => match default {
            Some(default) => Ok(default.to_string()),
            None => Err(ConfigError::MissingEnvVar(name.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_no_vars_is_identity() {
        assert_eq!(expand_env_vars("host: localhost").unwrap(), "host: localhost");
    }

    #[test]
    fn expand_plain_dollar_stays_literal() {
        assert_eq!(expand_env_vars("price: $100").unwrap(), "price: $100");
    }

    #[test]
    fn expand_escaped_dollar() {
        assert_eq!(expand_env_vars("a $$b").unwrap(), "a $b");
    }

    #[test]
    fn expand_with_default() {
        assert_eq!(
            expand_env_vars("port: ${PATSIM_TEST_UNSET_PORT:-8080}").unwrap(),
            "port: 8080"
        );
    }

    #[test]
    fn expand_with_empty_default() {
        assert_eq!(expand_env_vars("key: ${PATSIM_TEST_UNSET_KEY:-}").unwrap(), "key: ");
    }

    #[test]
    fn expand_missing_required_var_errors() {
        let err = expand_env_vars("key: ${PATSIM_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "PATSIM_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn expand_unclosed_reference_errors() {
        let err = expand_env_vars("key: ${UNCLOSED").unwrap_err();
        assert!(matches!(err, ConfigError::UnclosedVarReference));
    }

    #[test]
    fn expand_set_var() {
        // Set-var expansion, using a name this test owns.
        unsafe { std::env::set_var("PATSIM_TEST_SET_VAR", "value-1") };
        assert_eq!(
            expand_env_vars("v: ${PATSIM_TEST_SET_VAR}").unwrap(),
            "v: value-1"
        );
        unsafe { std::env::remove_var("PATSIM_TEST_SET_VAR") };
    }

    #[tokio::test]
    async fn load_missing_file_yields_defaults() {
        let config = Config::load("/nonexistent/patsim.yaml").await.unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.buffer_cap, 5);
        assert!(config.storage.sessions_dir.is_none());
    }

    #[test]
    fn parse_session_section() {
        let yaml = "\
session:
  length_minutes: 10
  debounce_ms: 500
  buffer_cap: 3
";
        let config: Config = serde_saphyr::from_str(yaml).unwrap();
        assert_eq!(config.session.length_minutes, 10);
        assert_eq!(config.session.debounce_ms, 500);
        assert_eq!(config.session.buffer_cap, 3);
        // Unset fields keep their defaults.
        assert_eq!(config.session.inactivity_secs, 90);
    }

    #[test]
    fn engine_config_converts_units() {
        let session = SessionConfig::default();
        let engine = session.engine_config();
        assert_eq!(engine.debounce, Duration::from_millis(4_000));
        assert_eq!(engine.session_length, Duration::from_secs(30 * 60));
    }
}
