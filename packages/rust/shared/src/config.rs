//! Application configuration for AfriVerse.
//!
//! User config lives at `~/.afriverse/afriverse.toml`.
//! Environment overrides (`BACKEND_URL`) win over the file, which wins over defaults.
//! Engine credentials are never stored: the config only names the env vars holding them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AfriverseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "afriverse.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".afriverse";

/// Env var that overrides `backend.base_url`.
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";

// ---------------------------------------------------------------------------
// Config structs (matching afriverse.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend REST surface.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Content-addressed storage gateway.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Speech-to-text engines.
    #[serde(default)]
    pub engines: EnginesConfig,

    /// Validation and consensus policy.
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Per-worker identity and timer periods.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Initial community → validator roster.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Timeout for every backend and reasoning call.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Timeout for `GET /health` probes.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_secs: default_backend_timeout(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:4000".into()
}
fn default_backend_timeout() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    5
}

/// `[gateway]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway prefix; the content reference is appended as the last path segment.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud/ipfs".into()
}
fn default_gateway_timeout() -> u64 {
    60
}

/// `[engines]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default = "default_openai_url")]
    pub openai_base_url: String,

    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    /// Name of the env var holding the OpenAI key.
    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,

    #[serde(default = "default_huggingface_url")]
    pub huggingface_url: String,

    /// Name of the env var holding the HuggingFace token.
    #[serde(default = "default_huggingface_token_env")]
    pub huggingface_token_env: String,

    /// Timeout for a single transcription request.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            openai_base_url: default_openai_url(),
            whisper_model: default_whisper_model(),
            openai_api_key_env: default_openai_key_env(),
            huggingface_url: default_huggingface_url(),
            huggingface_token_env: default_huggingface_token_env(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_whisper_model() -> String {
    "whisper-1".into()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_huggingface_url() -> String {
    "https://api-inference.huggingface.co/models/facebook/wav2vec2-large-xlsr-53".into()
}
fn default_huggingface_token_env() -> String {
    "HUGGINGFACE_TOKEN".into()
}
fn default_engine_timeout() -> u64 {
    120
}

/// `[consensus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum share of approving opinions.
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,

    /// Minimum mean confidence across all opinions.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// The knowledge-base check must score strictly above this to approve an atom.
    #[serde(default = "default_consistency_threshold")]
    pub consistency_threshold: f64,

    /// Confidence assumed when the consistency response carries none.
    #[serde(default = "default_consistency_default")]
    pub consistency_default_confidence: f64,

    /// Confidence assumed when the consistency check could not be run.
    #[serde(default = "default_consistency_failure")]
    pub consistency_failure_confidence: f64,

    /// Restricted-content terms, matched as case-insensitive substrings.
    #[serde(default = "default_sensitive_terms")]
    pub sensitive_terms: Vec<String>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            approval_threshold: default_approval_threshold(),
            confidence_threshold: default_confidence_threshold(),
            consistency_threshold: default_consistency_threshold(),
            consistency_default_confidence: default_consistency_default(),
            consistency_failure_confidence: default_consistency_failure(),
            sensitive_terms: default_sensitive_terms(),
        }
    }
}

fn default_approval_threshold() -> f64 {
    0.70
}
fn default_confidence_threshold() -> f64 {
    0.60
}
fn default_consistency_threshold() -> f64 {
    0.70
}
fn default_consistency_default() -> f64 {
    0.3
}
fn default_consistency_failure() -> f64 {
    0.2
}
fn default_sensitive_terms() -> Vec<String> {
    [
        "sacred",
        "secret",
        "restricted",
        "initiation",
        "elder_only",
        "gender_restricted",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Identity of one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub port: u16,
}

impl WorkerConfig {
    fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_ingest_worker")]
    pub ingest: WorkerConfig,
    #[serde(default = "default_symbolizer_worker")]
    pub symbolizer: WorkerConfig,
    #[serde(default = "default_query_worker")]
    pub query: WorkerConfig,
    #[serde(default = "default_transcribe_worker")]
    pub transcribe: WorkerConfig,
    #[serde(default = "default_validator_worker")]
    pub validator: WorkerConfig,

    /// Period of the transcription engine probe.
    #[serde(default = "default_transcribe_health")]
    pub transcribe_health_secs: u64,

    /// Period of the backend health probe run by the query worker.
    #[serde(default = "default_query_health")]
    pub query_health_secs: u64,

    /// Period of the validator registry refresh.
    #[serde(default = "default_registry_refresh")]
    pub registry_refresh_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            ingest: default_ingest_worker(),
            symbolizer: default_symbolizer_worker(),
            query: default_query_worker(),
            transcribe: default_transcribe_worker(),
            validator: default_validator_worker(),
            transcribe_health_secs: default_transcribe_health(),
            query_health_secs: default_query_health(),
            registry_refresh_secs: default_registry_refresh(),
        }
    }
}

fn default_ingest_worker() -> WorkerConfig {
    WorkerConfig::new("ingest_agent", 8001)
}
fn default_symbolizer_worker() -> WorkerConfig {
    WorkerConfig::new("symbolizer_agent", 8002)
}
fn default_query_worker() -> WorkerConfig {
    WorkerConfig::new("query_agent", 8003)
}
fn default_transcribe_worker() -> WorkerConfig {
    WorkerConfig::new("transcribe_agent", 8004)
}
fn default_validator_worker() -> WorkerConfig {
    WorkerConfig::new("validator_agent", 8005)
}
fn default_transcribe_health() -> u64 {
    60
}
fn default_query_health() -> u64 {
    30
}
fn default_registry_refresh() -> u64 {
    120
}

/// `[registry]` section: the roster used until the first successful refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_communities")]
    pub communities: BTreeMap<String, Vec<String>>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            communities: default_communities(),
        }
    }
}

fn default_communities() -> BTreeMap<String, Vec<String>> {
    let roster = |ids: &[&str]| ids.iter().map(|id| id.to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        (
            "general".to_string(),
            roster(&["validator1", "validator2", "validator3"]),
        ),
        (
            "kikuyu".to_string(),
            roster(&["kikuyu_elder1", "kikuyu_elder2"]),
        ),
        (
            "maasai".to_string(),
            roster(&["maasai_elder1", "maasai_elder2"]),
        ),
    ])
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.afriverse/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AfriverseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.afriverse/afriverse.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AfriverseError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AfriverseError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
        if !url.is_empty() {
            tracing::debug!(%url, "backend url overridden from environment");
            config.backend.base_url = url;
        }
    }
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AfriverseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AfriverseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AfriverseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that every configured URL parses and every threshold is a probability.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for (field, value) in [
        ("backend.base_url", &config.backend.base_url),
        ("gateway.base_url", &config.gateway.base_url),
        ("engines.openai_base_url", &config.engines.openai_base_url),
        ("engines.huggingface_url", &config.engines.huggingface_url),
    ] {
        Url::parse(value)
            .map_err(|e| AfriverseError::config(format!("{field} = {value:?} is not a URL: {e}")))?;
    }

    let c = &config.consensus;
    for (field, value) in [
        ("consensus.approval_threshold", c.approval_threshold),
        ("consensus.confidence_threshold", c.confidence_threshold),
        ("consensus.consistency_threshold", c.consistency_threshold),
        (
            "consensus.consistency_default_confidence",
            c.consistency_default_confidence,
        ),
        (
            "consensus.consistency_failure_confidence",
            c.consistency_failure_confidence,
        ),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(AfriverseError::config(format!(
                "{field} must be within [0, 1], got {value}"
            )));
        }
    }

    Ok(())
}

/// Read a credential from the env var named in config. Empty counts as unset.
pub fn credential(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}
