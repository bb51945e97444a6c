//! Configuration types for Cadence

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{CadenceError, Result};

/// Main configuration for Cadence
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CadenceConfig {
    /// Pipeline runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Pipeline runner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum kickoffs in flight at once within one run
    pub max_concurrent_kickoffs: usize,

    /// Maximum branches of one parallel group in flight at once
    pub max_branch_concurrency: usize,

    /// Optional deadline for a whole run (e.g. `"30s"`)
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_kickoffs: 16,
            max_branch_concurrency: 8,
            deadline: None,
        }
    }
}

impl RunnerConfig {
    /// Set the kickoff concurrency limit
    pub fn max_concurrent_kickoffs(mut self, max: usize) -> Self {
        self.max_concurrent_kickoffs = max;
        self
    }

    /// Set the per-group branch concurrency limit
    pub fn max_branch_concurrency(mut self, max: usize) -> Self {
        self.max_branch_concurrency = max;
        self
    }

    /// Set the run deadline
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Validate the runner configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a concurrency limit is zero or above
    /// [`Semaphore::MAX_PERMITS`], or the deadline is zero.
    pub fn validate(&self) -> Result<()> {
        check_limit("runner.max_concurrent_kickoffs", self.max_concurrent_kickoffs)?;
        check_limit("runner.max_branch_concurrency", self.max_branch_concurrency)?;
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(CadenceError::config("runner.deadline must be greater than zero"));
        }
        Ok(())
    }
}

fn check_limit(key: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(CadenceError::config(format!("{key} must be at least 1")));
    }
    if value > Semaphore::MAX_PERMITS {
        return Err(CadenceError::config(format!(
            "{key} must be at most {}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

/// Builder for CadenceConfig
pub struct ConfigBuilder {
    config: CadenceConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: CadenceConfig::default(),
        }
    }

    /// Set runner configuration
    pub fn runner(mut self, config: RunnerConfig) -> Self {
        self.config.runner = config;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CadenceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CadenceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (`cadence.toml`)
    /// 3. File named by `CADENCE_CONFIG_PATH`, if set
    /// 4. `CADENCE_`-prefixed environment variables, nested with `__`
    ///    (e.g. `CADENCE_RUNNER__DEADLINE=30s`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file("cadence.toml"));

        if let Ok(path) = std::env::var("CADENCE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: CadenceConfig = figment
            .merge(Env::prefixed("CADENCE_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| CadenceError::config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.json`, anything
    /// else is read as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Json, Serialized, Toml, Yaml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(CadenceError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::from(Serialized::defaults(CadenceConfig::default()));
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };

        let config: CadenceConfig = figment.extract().map_err(|e| {
            CadenceError::config(format!("Failed to load configuration file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.runner.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CadenceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.max_concurrent_kickoffs, 16);
        assert_eq!(config.runner.max_branch_concurrency, 8);
        assert!(config.runner.deadline.is_none());
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let runner = RunnerConfig::default().max_concurrent_kickoffs(0);
        assert!(matches!(
            runner.validate(),
            Err(CadenceError::Configuration(_))
        ));

        let runner = RunnerConfig::default().max_branch_concurrency(0);
        assert!(runner.validate().is_err());

        let runner = RunnerConfig::default().deadline(Duration::ZERO);
        assert!(runner.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_limits_above_max_permits() {
        let runner = RunnerConfig::default().max_concurrent_kickoffs(usize::MAX);
        let err = runner.validate().unwrap_err();
        assert!(matches!(err, CadenceError::Configuration(_)));
        assert!(err.to_string().contains("max_concurrent_kickoffs must be at most"));

        let runner = RunnerConfig::default().max_branch_concurrency(usize::MAX);
        assert!(runner.validate().is_err());

        let runner = RunnerConfig::default()
            .max_concurrent_kickoffs(Semaphore::MAX_PERMITS)
            .max_branch_concurrency(Semaphore::MAX_PERMITS);
        assert!(runner.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .runner(RunnerConfig::default().deadline(Duration::from_secs(5)))
            .build()
            .unwrap();
        assert_eq!(config.runner.deadline, Some(Duration::from_secs(5)));

        assert!(
            ConfigBuilder::new()
                .runner(RunnerConfig::default().max_concurrent_kickoffs(0))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[runner]\nmax_concurrent_kickoffs = 4\ndeadline = \"1m 30s\""
        )
        .unwrap();

        let config = CadenceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.runner.max_concurrent_kickoffs, 4);
        assert_eq!(config.runner.max_branch_concurrency, 8);
        assert_eq!(config.runner.deadline, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "runner:\n  max_branch_concurrency: 2").unwrap();

        let config = CadenceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.runner.max_branch_concurrency, 2);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[runner]\nmax_concurrent_kickoffs = 0").unwrap();

        let err = CadenceConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_kickoffs"));
    }

    #[test]
    fn test_missing_file() {
        let err = CadenceConfig::from_file("/nonexistent/cadence.toml").unwrap_err();
        assert!(matches!(err, CadenceError::Configuration(_)));
    }
}
