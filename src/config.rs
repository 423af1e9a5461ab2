//! Configuration parsing and path layout.
//!
//! The whole pipeline is driven by one [`Config`] value, built once in `main`
//! from a TOML file plus a small set of environment overrides, and passed by
//! reference into every command.
//!
//! ```toml
//! [redmine]
//! base_url = "https://progress.opensuse.org"
//! projects = ["openqav3", "qa"]
//!
//! [fetch]
//! page_size = 100
//! page_delay_secs = 1.0
//!
//! [enrichment]
//! max_retries = 3
//! save_interval = 50
//! delay_secs = 2.0
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/redmine-rag.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub redmine: RedmineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedmineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Usually supplied through `REDMINE_API_KEY` instead of the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RedmineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            projects: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://progress.opensuse.org".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_page_delay")]
    pub page_delay_secs: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_delay_secs: default_page_delay(),
        }
    }
}

fn default_page_size() -> u64 {
    100
}
fn default_page_delay() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
    #[serde(default = "default_enrich_delay")]
    pub delay_secs: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            save_interval: default_save_interval(),
            delay_secs: default_enrich_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_save_interval() -> usize {
    50
}
fn default_enrich_delay() -> f64 {
    2.0
}

/// Where every artifact of the pipeline lives.
///
/// Relative file names are resolved against `data_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_master_file")]
    pub master_file: PathBuf,
    #[serde(default = "default_enriched_file")]
    pub enriched_file: PathBuf,
    #[serde(default = "default_anonymized_file")]
    pub anonymized_file: PathBuf,
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            master_file: default_master_file(),
            enriched_file: default_enriched_file(),
            anonymized_file: default_anonymized_file(),
            mapping_file: default_mapping_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".redmine_checkpoints")
}
fn default_master_file() -> PathBuf {
    PathBuf::from("redmine_master_dataset.json")
}
fn default_enriched_file() -> PathBuf {
    PathBuf::from("redmine_master_dataset_with_journals.json")
}
fn default_anonymized_file() -> PathBuf {
    PathBuf::from("redmine_master_dataset_anonymized.json")
}
fn default_mapping_file() -> PathBuf {
    PathBuf::from("user_anonymization_mapping.json")
}

impl PathsConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.resolve(&self.checkpoint_dir)
    }

    /// Result file of one project's listing fetch.
    pub fn project_data_file(&self, project_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("redmine_{}_issues_data.json", project_id))
    }

    pub fn master_file(&self) -> PathBuf {
        self.resolve(&self.master_file)
    }

    pub fn enriched_file(&self) -> PathBuf {
        self.resolve(&self.enriched_file)
    }

    pub fn anonymized_file(&self) -> PathBuf {
        self.resolve(&self.anonymized_file)
    }

    pub fn mapping_file(&self) -> PathBuf {
        self.resolve(&self.mapping_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_embed_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_max_retries() -> u32 {
    5
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the vector store database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
    #[serde(default = "default_max_text")]
    pub max_text: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
            batch_size: default_ingest_batch(),
            max_text: default_max_text(),
            top_k: default_top_k(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./chroma_db")
}
fn default_collection() -> String {
    "redmine_issues".to_string()
}
fn default_ingest_batch() -> usize {
    50
}
fn default_max_text() -> usize {
    8192
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.redmine.timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.fetch.page_delay_secs)
    }

    pub fn enrichment_delay(&self) -> Duration {
        Duration::from_secs_f64(self.enrichment.delay_secs)
    }

    /// The Redmine API key, or a fatal error before any request is made.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.redmine.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "Redmine API key missing. Set REDMINE_API_KEY or [redmine].api_key in the config file."
            ),
        }
    }

    /// Apply `REDMINE_BASE_URL`, `REDMINE_API_KEY` and `PROJECT_IDS`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REDMINE_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.redmine.base_url = url;
        }
        if let Some(key) = lookup("REDMINE_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.redmine.api_key = Some(key);
        }
        if let Some(ids) = lookup("PROJECT_IDS") {
            let projects = parse_project_list(&ids);
            if !projects.is_empty() {
                self.redmine.projects = projects;
            }
        }
    }
}

/// Split a comma-separated project list, dropping blanks.
pub fn parse_project_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Load, override from the environment, and validate the configuration.
///
/// A missing file is only tolerated at [`DEFAULT_CONFIG_PATH`]; an explicit
/// path that does not exist is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        Config::default()
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    };

    config.apply_env_overrides();
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.fetch.page_size == 0 {
        bail!("fetch.page_size must be > 0");
    }
    if config.redmine.timeout_secs == 0 {
        bail!("redmine.timeout_secs must be > 0");
    }
    if config.enrichment.max_retries == 0 {
        bail!("enrichment.max_retries must be >= 1");
    }
    if config.enrichment.save_interval == 0 {
        bail!("enrichment.save_interval must be > 0");
    }
    if config.fetch.page_delay_secs < 0.0 || !config.fetch.page_delay_secs.is_finite() {
        bail!("fetch.page_delay_secs must be a non-negative number");
    }
    if config.enrichment.delay_secs < 0.0 || !config.enrichment.delay_secs.is_finite() {
        bail!("enrichment.delay_secs must be a non-negative number");
    }
    if config.store.batch_size == 0 {
        bail!("store.batch_size must be > 0");
    }
    if config.store.top_k == 0 {
        bail!("store.top_k must be >= 1");
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'openai'");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.fetch.page_size, 100);
        assert_eq!(config.enrichment.max_retries, 3);
        assert_eq!(config.enrichment.save_interval, 50);
        assert_eq!(config.store.collection, "redmine_issues");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [redmine]
            base_url = "https://file.example"
            projects = ["one"]
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("REDMINE_BASE_URL", "https://env.example"),
            ("REDMINE_API_KEY", "secret"),
            ("PROJECT_IDS", " qa, ,openqav3 "),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.redmine.base_url, "https://env.example");
        assert_eq!(config.require_api_key().unwrap(), "secret");
        assert_eq!(config.redmine.projects, vec!["qa", "openqav3"]);
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let config = Config::default();
        let err = config.require_api_key().unwrap_err();
        assert!(err.to_string().contains("REDMINE_API_KEY"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            provider = "carrier-pigeon"
            model = "x"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_retries_and_zero_timeout() {
        let config: Config = toml::from_str("[enrichment]\nmax_retries = 0\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let config: Config = toml::from_str("[redmine]\ntimeout_secs = 0\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));

        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_config(&dir.path().join("nope.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn relative_paths_resolve_under_data_dir() {
        let mut paths = PathsConfig::default();
        paths.data_dir = PathBuf::from("/data");
        assert_eq!(
            paths.master_file(),
            PathBuf::from("/data/redmine_master_dataset.json")
        );
        assert_eq!(
            paths.project_data_file("qa"),
            PathBuf::from("/data/redmine_qa_issues_data.json")
        );
        assert_eq!(
            paths.checkpoint_dir(),
            PathBuf::from("/data/.redmine_checkpoints")
        );
    }
}
