//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::merge::{MergeStrategy, TieBreak};

/// Graphsmith configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub merge: MergeConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub tuple_delimiter: String,
    pub record_delimiter: String,
    pub completion_delimiter: String,
    pub language: String,
    pub template_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub strategy: MergeStrategy,
    pub tie_break: TieBreak,
    pub existing_entity_sample: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            tuple_delimiter: "|".to_string(),
            record_delimiter: "^".to_string(),
            completion_delimiter: "DONE".to_string(),
            language: "English".to_string(),
            template_dir: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Structural,
            tie_break: TieBreak::PreferSmart,
            existing_entity_sample: 20,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("GRAPHSMITH_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("GRAPHSMITH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("graphsmith")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(anyhow!("scheduler.max_concurrent_tasks must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            ));
        }
        if self.extraction.tuple_delimiter.is_empty() || self.extraction.record_delimiter.is_empty()
        {
            return Err(anyhow!("Extraction delimiters must not be empty"));
        }
        if self.extraction.tuple_delimiter == self.extraction.record_delimiter {
            return Err(anyhow!(
                "extraction.tuple_delimiter and extraction.record_delimiter must differ"
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.model" => Ok(self.llm.model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            // Extraction settings
            "extraction.tuple_delimiter" => Ok(self.extraction.tuple_delimiter.clone()),
            "extraction.record_delimiter" => Ok(self.extraction.record_delimiter.clone()),
            "extraction.completion_delimiter" => Ok(self.extraction.completion_delimiter.clone()),
            "extraction.language" => Ok(self.extraction.language.clone()),
            "extraction.template_dir" => Ok(display_optional_path(&self.extraction.template_dir)),

            // Retry settings
            "retry.max_attempts" => Ok(self.retry.max_attempts.to_string()),
            "retry.base_delay_ms" => Ok(self.retry.base_delay_ms.to_string()),
            "retry.max_delay_ms" => Ok(self.retry.max_delay_ms.to_string()),

            // Scheduler settings
            "scheduler.max_concurrent_tasks" => Ok(self.scheduler.max_concurrent_tasks.to_string()),

            // Merge settings
            "merge.strategy" => Ok(self.merge.strategy.to_string()),
            "merge.tie_break" => Ok(self.merge.tie_break.to_string()),
            "merge.existing_entity_sample" => Ok(self.merge.existing_entity_sample.to_string()),

            // Storage settings
            "storage.snapshot_path" => Ok(display_optional_path(&self.storage.snapshot_path)),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use GRAPHSMITH_API_KEY or OPENAI_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `graphsmith config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // LLM settings
            "llm.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("llm.base_url must be an http(s) URL"));
                }
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }
            "llm.model" => {
                self.llm.model = value.to_string();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            // Extraction settings
            "extraction.tuple_delimiter" => {
                self.extraction.tuple_delimiter = non_empty(key, value)?;
            }
            "extraction.record_delimiter" => {
                self.extraction.record_delimiter = non_empty(key, value)?;
            }
            "extraction.completion_delimiter" => {
                self.extraction.completion_delimiter = non_empty(key, value)?;
            }
            "extraction.language" => {
                self.extraction.language = non_empty(key, value)?;
            }
            "extraction.template_dir" => {
                self.extraction.template_dir = optional_path(value);
            }

            // Retry settings
            "retry.max_attempts" => {
                let attempts: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_attempts value: {}", value))?;
                if attempts == 0 {
                    return Err(anyhow!("retry.max_attempts must be at least 1"));
                }
                self.retry.max_attempts = attempts;
            }
            "retry.base_delay_ms" => {
                self.retry.base_delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid base_delay_ms value: {}", value))?;
            }
            "retry.max_delay_ms" => {
                self.retry.max_delay_ms = value
                    .parse()
                    .with_context(|| format!("Invalid max_delay_ms value: {}", value))?;
            }

            // Scheduler settings
            "scheduler.max_concurrent_tasks" => {
                let workers: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_concurrent_tasks value: {}", value))?;
                if workers == 0 {
                    return Err(anyhow!("scheduler.max_concurrent_tasks must be at least 1"));
                }
                self.scheduler.max_concurrent_tasks = workers;
            }

            // Merge settings
            "merge.strategy" => {
                self.merge.strategy = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "merge.tie_break" => {
                self.merge.tie_break = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "merge.existing_entity_sample" => {
                self.merge.existing_entity_sample = value
                    .parse()
                    .with_context(|| format!("Invalid existing_entity_sample value: {}", value))?;
            }

            // Storage settings
            "storage.snapshot_path" => {
                self.storage.snapshot_path = optional_path(value);
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the GRAPHSMITH_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `graphsmith config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.base_url",
            "llm.model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "extraction.tuple_delimiter",
            "extraction.record_delimiter",
            "extraction.completion_delimiter",
            "extraction.language",
            "extraction.template_dir",
            "retry.max_attempts",
            "retry.base_delay_ms",
            "retry.max_delay_ms",
            "scheduler.max_concurrent_tasks",
            "merge.strategy",
            "merge.tie_break",
            "merge.existing_entity_sample",
            "storage.snapshot_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn non_empty(key: &str, value: &str) -> anyhow::Result<String> {
    if value.is_empty() {
        return Err(anyhow!("{} must not be empty", key));
    }
    Ok(value.to_string())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn display_optional_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrent_tasks, 3);
        assert_eq!(config.extraction.tuple_delimiter, "|");
        assert_eq!(config.extraction.record_delimiter, "^");
        assert_eq!(config.merge.strategy, MergeStrategy::Structural);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [merge]
            strategy = "smart"
            tie_break = "prefer_existing"

            [scheduler]
            max_concurrent_tasks = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.merge.strategy, MergeStrategy::Smart);
        assert_eq!(config.merge.tie_break, TieBreak::PreferExisting);
        assert_eq!(config.scheduler.max_concurrent_tasks, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Config::from_toml_str("[scheduler]\nmax_concurrent_tasks = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_get_and_set_round_trip() {
        let mut config = Config::default();
        config.set("merge.strategy", "smart").unwrap();
        config.set("retry.max_attempts", "5").unwrap();
        config.set("storage.snapshot_path", "/tmp/graph.json").unwrap();

        assert_eq!(config.get("merge.strategy").unwrap(), "smart");
        assert_eq!(config.get("retry.max_attempts").unwrap(), "5");
        assert_eq!(config.get("storage.snapshot_path").unwrap(), "/tmp/graph.json");

        config.set("storage.snapshot_path", "none").unwrap();
        assert_eq!(config.get("storage.snapshot_path").unwrap(), "(not set)");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("llm.temperature", "3.5").is_err());
        assert!(config.set("merge.strategy", "magic").is_err());
        assert!(config.set("scheduler.max_concurrent_tasks", "0").is_err());
        assert!(config.set("llm.api_key", "sk-123").is_err());
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let entries = config.list().unwrap();
        assert_eq!(entries.len(), 19);
        assert!(entries.iter().any(|(k, _)| k == "merge.tie_break"));
    }

    #[test]
    fn test_stored_api_key_is_rejected() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.set("merge.tie_break", "prefer_structural").unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
