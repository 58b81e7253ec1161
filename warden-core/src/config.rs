//! Configuration management

use crate::error::{WardenError, WardenResult};
use crate::logging::LoggingConfig;
use crate::traits::{CatalogSource, PermissionDefinition};
use crate::types::{TargetType, DEFAULT_MODEL_ACTIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,
    /// Explicit permission definitions
    pub catalog: Vec<CatalogEntry>,
    /// Models that get the default add/change/delete/view permissions
    pub catalog_models: Vec<CatalogModel>,
    /// Group id -> member user ids
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Which backend holds the grant relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite connection URL, used when `backend = "sqlite"`
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: "sqlite://warden.db".to_string(),
        }
    }
}

/// What `assign` does when the grant already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Return the stored record unchanged
    #[default]
    Idempotent,
    /// Fail with `DuplicateGrant`
    Strict,
}

/// What happens to grants when their target object is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Grants outlive the object and become dangling
    #[default]
    Retain,
    /// Grants are deleted with the object
    Cascade,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub duplicate_grants: DuplicatePolicy,
    pub on_target_delete: DeletePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Target type as `namespace.model`
    pub target: String,
    pub codename: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogModel {
    /// Target type as `namespace.model`
    pub target: String,
}

impl WardenConfig {
    /// Default config location, `~/.warden/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warden")
            .join("config.toml")
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> WardenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WardenError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: WardenConfig = toml::from_str(&content).map_err(|e| WardenError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> WardenResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| WardenError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| WardenError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> WardenResult<()> {
        if self.store.backend == StoreBackend::Sqlite && self.store.database_url.trim().is_empty()
        {
            return Err(WardenError::Config {
                message: "store.database_url must be set for the sqlite backend".to_string(),
                source: None,
                context: crate::ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set store.database_url, e.g. sqlite://warden.db"),
            });
        }

        for entry in &self.catalog {
            entry.target.parse::<TargetType>()?;
            if entry.codename.trim().is_empty() {
                return Err(crate::validation_error!(
                    format!("Empty codename for target {}", entry.target),
                    "catalog.codename",
                    "config"
                ));
            }
        }

        for model in &self.catalog_models {
            model.target.parse::<TargetType>()?;
        }

        Ok(())
    }
}

impl CatalogSource for WardenConfig {
    fn definitions(&self) -> WardenResult<Vec<PermissionDefinition>> {
        let mut definitions = Vec::new();

        for model in &self.catalog_models {
            let target_type: TargetType = model.target.parse()?;
            for action in DEFAULT_MODEL_ACTIONS {
                definitions.push(PermissionDefinition {
                    codename: format!("{}_{}", action, target_type.model),
                    description: format!("Can {} {}", action, target_type.model),
                    target_type: target_type.clone(),
                });
            }
        }

        for entry in &self.catalog {
            definitions.push(PermissionDefinition {
                target_type: entry.target.parse()?,
                codename: entry.codename.clone(),
                description: entry.description.clone(),
            });
        }

        Ok(definitions)
    }
}
