//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use crate::application::errors::ConfigError;
use crate::domain::entities::IMMUTABLE_ARTICLE_ID;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub storage: StorageConfig,
    pub proposals: ProposalConfig,
    pub requirements: RequirementsConfig,
    pub debate: DebateConfig,
    pub concurrency: ConcurrencyConfig,
    pub logging: LoggingConfig,
    pub constitution: ConstitutionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub data_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProposalConfig {
    pub voting_duration_hours: u64,
    pub abandon_after_days: u64,
    pub reaper_interval_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequirementsConfig {
    pub cache_ttl_days: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DebateConfig {
    pub required_points: i64,
    pub vote_duration_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConcurrencyConfig {
    pub lock_timeout_ms: u64,
    pub lock_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConstitutionConfig {
    pub articles: Vec<ArticleSeed>,
}

/// Article created at first start
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArticleSeed {
    pub id: String,
    pub text: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Turnout recorded as the article's first history entry
    #[serde(default)]
    pub baseline_voters: u64,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "leviatan".to_string(),
            prefix: "!".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/leviatan.json"),
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            voting_duration_hours: 7 * 24,
            abandon_after_days: 30,
            reaper_interval_hours: 24,
        }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self { cache_ttl_days: 7 }
    }
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            required_points: 100,
            vote_duration_hours: 24,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2000,
            lock_retries: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ProposalConfig {
    pub fn voting_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.voting_duration_hours as i64)
    }

    pub fn abandon_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.abandon_after_days as i64)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_hours * 3600)
    }
}

impl RequirementsConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache_ttl_days as i64)
    }
}

impl DebateConfig {
    pub fn vote_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.vote_duration_hours as i64)
    }
}

impl ConcurrencyConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_env() -> Self {
        // Load from environment variables
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Environment variables override file values
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("LEVIATAN_DATA_FILE") {
            self.storage.data_file = PathBuf::from(path);
        }

        if let Ok(prefix) = std::env::var("LEVIATAN_PREFIX") {
            self.bot.prefix = prefix;
        }

        if let Ok(level) = std::env::var("LEVIATAN_LOG") {
            self.logging.level = level;
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::MissingField("bot.prefix".to_string()));
        }
        let durations = [
            ("proposals.voting-duration-hours", self.proposals.voting_duration_hours),
            ("proposals.abandon-after-days", self.proposals.abandon_after_days),
            ("proposals.reaper-interval-hours", self.proposals.reaper_interval_hours),
            ("requirements.cache-ttl-days", self.requirements.cache_ttl_days),
            ("debate.vote-duration-hours", self.debate.vote_duration_hours),
            ("concurrency.lock-timeout-ms", self.concurrency.lock_timeout_ms),
        ];
        for (key, value) in durations {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", key)));
            }
        }
        if self.concurrency.lock_retries == 0 {
            return Err(ConfigError::InvalidValue("concurrency.lock-retries must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for article in &self.constitution.articles {
            if article.id == IMMUTABLE_ARTICLE_ID {
                return Err(ConfigError::InvalidValue("article 0 is reserved".to_string()));
            }
            if !seen.insert(article.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!("duplicate article id: {}", article.id)));
            }
            if !(article.weight.is_finite() && article.weight > 0.0) {
                return Err(ConfigError::InvalidValue(format!("article {} weight must be positive", article.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bot.prefix, "!");
        assert_eq!(config.proposals.abandon_after(), chrono::Duration::days(30));
        assert_eq!(config.proposals.reaper_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
bot:
  prefix: "/"
constitution:
  articles:
    - id: "1"
      text: "Free speech"
      baseline-voters: 100
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bot.prefix, "/");
        assert_eq!(config.bot.name, "leviatan");
        assert_eq!(config.debate.required_points, 100);
        assert_eq!(config.constitution.articles[0].weight, 1.0);
        assert_eq!(config.constitution.articles[0].baseline_voters, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved_and_duplicate_articles() {
        let mut config = Config::default();
        config.constitution.articles.push(ArticleSeed {
            id: "0".to_string(),
            text: "x".to_string(),
            weight: 1.0,
            baseline_voters: 0,
        });
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        config.constitution.articles[0].id = "1".to_string();
        config.constitution.articles.push(config.constitution.articles[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = Config::default();
        config.concurrency.lock_retries = 0;
        assert!(config.validate().is_err());
    }
}
