use crate::cli::Cli;
use crate::resolvers::BUNDLED_SCHEMATRON_BASE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid URI '{uri}': {details}")]
    InvalidUri { uri: String, details: String },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub resolution: ResolutionConfig,
    pub network: NetworkConfig,
    pub processors: ProcessorConfig,
    pub schematron: SchematronConfig,
}

/// URI resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Base URI for references resolved without a calling context.
    /// Defaults to the working directory.
    pub default_base_uri: Option<String>,
}

/// Network configuration for the HTTP resolver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for failed fetches
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Cap on the exponential backoff delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// User agent override
    pub user_agent: Option<String>,
}

/// Default processor names per capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProcessorConfig {
    pub default_xslt: Option<String>,
    pub default_xquery: Option<String>,
}

/// Location of the Schematron stage stylesheets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchematronConfig {
    /// Directory URI holding `xslt1/` and `xslt2/` stage stylesheets
    pub resource_base_uri: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: None,
        }
    }
}

impl Default for SchematronConfig {
    fn default() -> Self {
        Self {
            resource_base_uri: BUNDLED_SCHEMATRON_BASE.to_string(),
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = if let Some(config_path) = &cli.config {
            Self::load_from_file(config_path).await?
        } else {
            Self::find_config_file().await?.unwrap_or_default()
        };

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "xml-invoker.toml",
            "xml-invoker.json",
            ".xml-invoker.toml",
            ".xml-invoker.json",
        ];

        // Check current directory first
        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        // Check user config directory
        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xml-invoker");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(base) = env.get("XML_INVOKER_DEFAULT_BASE_URI") {
            config.resolution.default_base_uri = Some(base);
        }

        // Network settings
        if let Some(timeout) = env.get("XML_INVOKER_TIMEOUT") {
            config.network.timeout_seconds = timeout.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid XML_INVOKER_TIMEOUT value: {}", timeout))
            })?;
        }

        if let Some(retry_attempts) = env.get("XML_INVOKER_RETRY_ATTEMPTS") {
            config.network.retry_attempts = retry_attempts.parse().map_err(|_| {
                ConfigError::Environment(format!(
                    "Invalid XML_INVOKER_RETRY_ATTEMPTS value: {}",
                    retry_attempts
                ))
            })?;
        }

        // Processor defaults
        if let Some(name) = env.get("XML_INVOKER_DEFAULT_XSLT") {
            config.processors.default_xslt = Some(name);
        }

        if let Some(name) = env.get("XML_INVOKER_DEFAULT_XQUERY") {
            config.processors.default_xquery = Some(name);
        }

        if let Some(base) = env.get("XML_INVOKER_SCHEMATRON_BASE") {
            config.schematron.resource_base_uri = base;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if let Some(base) = &cli.base {
            config.resolution.default_base_uri = Some(base.clone());
        }
        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(base) = &config.resolution.default_base_uri {
            parse_uri(base)?;
        }

        let resource_base = parse_uri(&config.schematron.resource_base_uri)?;
        if !resource_base.path().ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "Schematron resource base must be a directory URI ending in '/': {}",
                resource_base
            )));
        }

        // Validate network settings
        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.retry_attempts > 10 {
            return Err(ConfigError::Validation(
                "Retry attempts cannot exceed 10".to_string(),
            ));
        }

        if config.network.retry_delay_ms > config.network.max_retry_delay_ms {
            return Err(ConfigError::Validation(
                "Retry delay cannot exceed the maximum retry delay".to_string(),
            ));
        }

        for name in [
            &config.processors.default_xslt,
            &config.processors.default_xquery,
        ]
        .into_iter()
        .flatten()
        {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Default processor names cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The configured default base URI, or the working directory
    pub fn default_base_uri(config: &Config) -> Result<Url> {
        match &config.resolution.default_base_uri {
            Some(base) => parse_uri(base),
            None => {
                let cwd = std::env::current_dir()?;
                Url::from_directory_path(&cwd).map_err(|_| ConfigError::InvalidUri {
                    uri: cwd.display().to_string(),
                    details: "working directory is not an absolute path".to_string(),
                })
            }
        }
    }

    /// The Schematron resource base as a URI
    pub fn schematron_base_uri(config: &Config) -> Result<Url> {
        parse_uri(&config.schematron.resource_base_uri)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(config: &Config) -> Result<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| ConfigError::InvalidUri {
        uri: uri.to_string(),
        details: e.to_string(),
    })
}
