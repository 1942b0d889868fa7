//! Engine and per-domain configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jobrun_core::RoleRule;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration of one business domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain name, also the provider registry key.
    pub name: String,

    /// Directory receiving staged inputs. Defaults to a per-domain
    /// directory under the system temp dir.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Directory receiving results. Defaults to `results/<name>`.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Minimum number of submitted files.
    #[serde(default)]
    pub min_inputs: usize,

    /// Input roles recognized by filename prefix.
    #[serde(default)]
    pub roles: Vec<RoleRule>,

    /// Maximum run time before the watchdog fails the run. Disabled when unset.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
}

impl DomainConfig {
    /// Create a domain with no roles and default directories.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            staging_dir: None,
            results_dir: None,
            min_inputs: 0,
            roles: Vec::new(),
            max_runtime_secs: None,
        }
    }

    /// Sales registry reconciliation: deals, check and employee files.
    pub fn registry() -> Self {
        Self::new("registry")
            .with_role(RoleRule::new("deals", "Сделки").with_prefix("deals"))
            .with_role(RoleRule::new("check", "Проверка").with_prefix("check"))
            .with_role(RoleRule::new("employee", "empl"))
            .with_min_inputs(3)
    }

    /// Generic demo domain accepting any number of files.
    pub fn demo() -> Self {
        Self::new("demo")
            .with_role(RoleRule::new("input", "").optional().multiple())
            .with_min_inputs(1)
    }

    /// Builder method to add a role.
    pub fn with_role(mut self, rule: RoleRule) -> Self {
        self.roles.push(rule);
        self
    }

    /// Builder method to set the minimum input count.
    pub fn with_min_inputs(mut self, min: usize) -> Self {
        self.min_inputs = min;
        self
    }

    /// Builder method to set the staging directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Builder method to set the results directory.
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    /// Builder method to enable the watchdog.
    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        self.max_runtime_secs = Some(limit.as_secs().max(1));
        self
    }

    /// Resolved staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir()
                .join("jobrun")
                .join("staging")
                .join(&self.name)
        })
    }

    /// Resolved results directory.
    pub fn results_dir(&self) -> PathBuf {
        self.results_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("results").join(&self.name))
    }

    /// Watchdog limit, if enabled.
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }

    /// Check the domain for configuration mistakes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("domain name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &self.roles {
            if !seen.insert(rule.role.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "domain '{}': role '{}' is declared twice",
                    self.name, rule.role
                )));
            }
            if rule.prefixes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "domain '{}': role '{}' has no prefixes",
                    self.name, rule.role
                )));
            }
        }

        if self.max_runtime_secs == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "domain '{}': max_runtime_secs must be positive",
                self.name
            )));
        }

        Ok(())
    }
}

/// Configuration of every domain served by one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub domains: Vec<DomainConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domains: vec![DomainConfig::registry(), DomainConfig::demo()],
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every domain and reject duplicate names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for domain in &self.domains {
            domain.validate()?;
            if !names.insert(domain.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "domain '{}' is declared twice",
                    domain.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a domain by name.
    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.name == name)
    }
}
