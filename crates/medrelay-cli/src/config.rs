//! Configuration loading.
//! Reads medrelay.toml from the current directory or the path in the
//! MEDRELAY_CONFIG env var; credentials fall back to MEDRELAY_* env vars
//! so they can live outside the config file.

use serde::Deserialize;
use std::path::Path;

use medrelay_sources::SourceSettings;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_steps_file")]
    pub steps_file: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_steps_file() -> String { "steps.csv".to_string() }
fn default_output_dir() -> String { "pipeline_outputs".to_string() }
fn default_max_pages()  -> usize  { 2 }
fn default_page_size()  -> usize  { 50 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            steps_file: default_steps_file(),
            output_dir: default_output_dir(),
            max_pages: default_max_pages(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub pubmed: PubMedConfig,
    #[serde(default)]
    pub patentsview: PatentsViewConfig,
    #[serde(default)]
    pub icd11: Icd11Config,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PubMedConfig {
    pub api_key: Option<String>,
    /// Publication-date window (YYYY/MM/DD or YYYY), both optional.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatentsViewConfig {
    pub api_key: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Icd11Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path =
            std::env::var("MEDRELAY_CONFIG").unwrap_or_else(|_| "medrelay.toml".to_string());

        if !Path::new(&path).exists() {
            tracing::warn!(
                "Config file not found: {path}; using defaults \
                 (copy medrelay.example.toml to medrelay.toml to customize)"
            );
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Source settings with env-var fallbacks for credentials.
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            pubmed_api_key: self
                .sources
                .pubmed
                .api_key
                .clone()
                .or_else(|| env_opt("MEDRELAY_PUBMED_API_KEY")),
            pubmed_date_from: self.sources.pubmed.date_from.clone(),
            pubmed_date_to: self.sources.pubmed.date_to.clone(),
            patentsview_api_key: self
                .sources
                .patentsview
                .api_key
                .clone()
                .or_else(|| env_opt("MEDRELAY_PATENTSVIEW_API_KEY")),
            patent_year_from: self.sources.patentsview.year_from,
            patent_year_to: self.sources.patentsview.year_to,
            icd11_client_id: self
                .sources
                .icd11
                .client_id
                .clone()
                .or_else(|| env_opt("MEDRELAY_ICD11_CLIENT_ID")),
            icd11_client_secret: self
                .sources
                .icd11
                .client_secret
                .clone()
                .or_else(|| env_opt("MEDRELAY_ICD11_CLIENT_SECRET")),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}
