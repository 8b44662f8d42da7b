use anyhow::{Context as AnyhowContext, Result};
use context_dispatch::DispatchConfig;
use context_operations::ModelLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file picked up when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = ".context/config.toml";

/// OpenAI-compatible chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; `/chat/completions` is appended
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// USD per million prompt tokens
    pub input_cost_per_mtok: f64,
    /// USD per million completion tokens
    pub output_cost_per_mtok: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub backend: BackendConfig,
    pub limits: ModelLimits,
    pub dispatch: DispatchConfig,
    /// `tokenizer.json` for exact counts (needs the `hf-tokenizer` feature)
    pub tokenizer: Option<PathBuf>,
}

impl CliConfig {
    /// Load from `path`, else from [`DEFAULT_CONFIG_PATH`] if it exists,
    /// else defaults. Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `CONTEXT_*` overrides read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("CONTEXT_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(key) = var("CONTEXT_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(model) = var("CONTEXT_MODEL") {
            self.backend.model = model;
        }
        if let Some(value) = var("CONTEXT_MAX_INPUT_TOKENS") {
            self.limits.max_input_tokens = parse_number("CONTEXT_MAX_INPUT_TOKENS", &value)?;
        }
        if let Some(value) = var("CONTEXT_CONCURRENCY") {
            self.dispatch.concurrency = parse_number("CONTEXT_CONCURRENCY", &value)?;
        }
        if let Some(value) = var("CONTEXT_MAX_RETRIES") {
            self.dispatch.retry.max_retries = parse_number("CONTEXT_MAX_RETRIES", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backend.url.trim().is_empty() {
            return Err("backend.url must not be empty".to_string());
        }
        if self.backend.model.trim().is_empty() {
            return Err("backend.model must not be empty".to_string());
        }
        if self.backend.timeout_secs == 0 {
            return Err("backend.timeout_secs must be > 0".to_string());
        }
        if self.backend.input_cost_per_mtok < 0.0 || self.backend.output_cost_per_mtok < 0.0 {
            return Err("backend costs must not be negative".to_string());
        }
        self.limits.validate()?;
        self.dispatch.validate()
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_valid() {
        assert!(CliConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CliConfig = toml::from_str(
            r#"
            [backend]
            model = "local-model"

            [dispatch]
            concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.model, "local-model");
        assert_eq!(config.backend.url, BackendConfig::default().url);
        assert_eq!(config.dispatch.concurrency, 2);
        assert_eq!(config.dispatch.retry.max_retries, 3);
        assert_eq!(config.limits, ModelLimits::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("CONTEXT_BACKEND_URL", "http://localhost:8080/v1"),
            ("CONTEXT_MODEL", "llama"),
            ("CONTEXT_MAX_INPUT_TOKENS", "32000"),
            ("CONTEXT_CONCURRENCY", "3"),
            ("CONTEXT_MAX_RETRIES", "1"),
        ]
        .into_iter()
        .collect();
        let mut config = CliConfig::default();
        config
            .apply_env(|key| env.get(key).map(|value| (*value).to_string()))
            .unwrap();

        assert_eq!(config.backend.url, "http://localhost:8080/v1");
        assert_eq!(config.backend.model, "llama");
        assert_eq!(config.backend.api_key, None);
        assert_eq!(config.limits.max_input_tokens, 32_000);
        assert_eq!(config.dispatch.concurrency, 3);
        assert_eq!(config.dispatch.retry.max_retries, 1);
    }

    #[test]
    fn test_bad_env_number_rejected() {
        let mut config = CliConfig::default();
        let result = config.apply_env(|key| (key == "CONTEXT_CONCURRENCY").then(|| "many".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_concurrency_invalid() {
        let mut config = CliConfig::default();
        config.dispatch.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
