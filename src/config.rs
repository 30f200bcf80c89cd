use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::templates::ScoringWeights;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    pub execution_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "nl-gate.duckdb".to_string(),
            pool_size: 5,
            execution_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "remote", "ollama", "anthropic" or "disabled"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "sqlcoder".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
            timeout_secs: 60,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
        }
    }
}

/// Ceilings applied by the SQL validator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValidatorConfig {
    pub max_query_length: usize,
    pub max_joins: usize,
    pub max_subqueries: usize,
    pub max_conditions: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
            max_joins: 5,
            max_subqueries: 3,
            max_conditions: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
    /// Circuits tracked before idle closed ones are dropped.
    pub max_circuits: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            success_threshold: 2,
            max_circuits: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub slow_query_ms: u64,
    pub very_slow_query_ms: u64,
    pub high_failure_rate: f64,
    pub history_size: usize,
    pub ring_size: usize,
    /// Per-fingerprint health records kept before old ones are dropped.
    pub max_tracked_queries: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            slow_query_ms: 3_000,
            very_slow_query_ms: 10_000,
            high_failure_rate: 0.3,
            history_size: 1_000,
            ring_size: 50,
            max_tracked_queries: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TemplateConfig {
    /// Minimum normalised match score (0-100) for a template to be used.
    pub match_threshold: f64,
    pub default_limit: u32,
    pub weights: ScoringWeights,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            match_threshold: 70.0,
            default_limit: 10,
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub core_tables: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            core_tables: vec![
                "Event".to_string(),
                "EventViolation".to_string(),
                "Locations".to_string(),
                "LocationType".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    /// DuckDB file holding learned queries. Empty means in-memory.
    pub store_path: String,
    /// JSON file promoted templates are exported to.
    pub export_path: String,
    pub hot_cache_size: usize,
    pub similarity_threshold: f64,
    pub scan_limit: usize,
    pub min_scan_use_count: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: "learned_queries.duckdb".to_string(),
            export_path: "promoted_templates.json".to_string(),
            hot_cache_size: 100,
            similarity_threshold: 0.7,
            scan_limit: 50,
            min_scan_use_count: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub validator: ValidatorConfig,
    pub breaker: BreakerConfig,
    pub monitor: MonitorConfig,
    pub cache: CacheConfig,
    pub templates: TemplateConfig,
    pub generator: GeneratorConfig,
    pub learning: LearningConfig,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for data storage
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, value_parser = ["pretty", "json"])]
    pub log_format: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = ["config.toml", "config/config.toml", "/etc/nl-gate/config.toml"];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLGATE__LLM__API_KEY and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(format) = &args.log_format {
            config.logging.format = if format == "json" {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(ConfigError::Message(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.cache.max_entries == 0 || self.learning.hot_cache_size == 0 {
            return Err(ConfigError::Message(
                "cache sizes must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.similarity_threshold) {
            return Err(ConfigError::Message(
                "learning.similarity_threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves a path relative to `data_dir` unless it is already absolute.
    pub fn data_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() || self.data_dir.is_empty() {
            path.to_path_buf()
        } else {
            Path::new(&self.data_dir).join(path)
        }
    }
}
