use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub corpus: CorpusConfig,
    pub roles: RolesConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ner: NerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub server: ServerConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub docs_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

/// Location of the role policy file. Read on every request so edits take
/// effect without a restart; an absent file means deny-all.
#[derive(Debug, Deserialize, Clone)]
pub struct RolesConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Named-entity recognizer collaborator. When disabled, PII detection
/// degrades to the structured-pattern layer only.
#[derive(Debug, Deserialize, Clone)]
pub struct NerConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_gen_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    pub path: PathBuf,
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_gen_timeout_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.ner.provider.as_str() {
        "disabled" => {}
        "remote" => {
            if config.ner.endpoint.is_none() {
                anyhow::bail!("ner.endpoint must be set when ner.provider is 'remote'");
            }
        }
        other => anyhow::bail!("Unknown ner provider: '{}'. Must be disabled or remote.", other),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("aguard.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[db]
path = "data/index.sqlite"

[corpus]
docs_dir = "data/docs"

[roles]
path = "config/roles.toml"

[server]
bind = "127.0.0.1:7400"

[audit]
path = "logs/audit.jsonl"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), MINIMAL);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.ner.provider, "disabled");
        assert_eq!(cfg.generation.provider, "disabled");
        assert_eq!(cfg.corpus.include_globs, vec!["**/*.md", "**/*.txt"]);
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_remote_ner_requires_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[ner]\nprovider = \"remote\"\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[embedding]\nprovider = \"faiss\"\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }
}
