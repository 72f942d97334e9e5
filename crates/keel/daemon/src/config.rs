//! Configuration for keeld
//!
//! Values are layered with the `config` crate: built-in defaults, then an
//! optional file, then `KEEL_`-prefixed environment variables where `__`
//! separates nesting levels (`KEEL_CATALOG__PATH`). The layered values land
//! in [`RawDaemonConfig`]; [`RawDaemonConfig::resolve`] checks them and
//! produces the typed [`DaemonConfig`].

use keel_controller::{ControllerConfig, WorkflowConfig, DEFAULT_SYSTEM_NAMESPACE};
use keel_provision::RegistryCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Every required key that was absent, reported together
    #[error("missing required configuration keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Layered configuration before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDaemonConfig {
    #[serde(default)]
    pub controller: RawControllerConfig,

    #[serde(default)]
    pub workflow: RawWorkflowConfig,

    #[serde(default)]
    pub catalog: RawCatalogConfig,

    #[serde(default)]
    pub bootstrap: RawBootstrapConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawControllerConfig {
    pub workers: Option<usize>,

    /// Zero disables periodic resync
    pub resync_interval_secs: Option<u64>,

    pub backoff_base_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    pub dependency_retry_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflowConfig {
    pub system_namespace: Option<String>,
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub registry: RawRegistryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRegistryConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalogConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBootstrapConfig {
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Validated daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub controller: ControllerConfig,
    pub workflow: WorkflowConfig,

    /// Root of the manifest catalog directory tree
    pub catalog_path: PathBuf,

    /// Directory of JSON seed objects loaded at startup
    pub bootstrap_path: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load from defaults, the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        RawDaemonConfig::load(path, None)?.resolve()
    }
}

impl RawDaemonConfig {
    /// Layer the sources. `env` replaces the process environment when given.
    pub fn load(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let defaults = ControllerConfig::default();
        let workflow = WorkflowConfig::default();

        let mut builder = config::Config::builder()
            .set_default("controller.workers", defaults.workers as u64)?
            .set_default(
                "controller.resync_interval_secs",
                defaults.resync_interval.map(|d| d.as_secs()).unwrap_or(0),
            )?
            .set_default("controller.backoff_base_ms", defaults.backoff_base.as_millis() as u64)?
            .set_default("controller.backoff_max_secs", defaults.backoff_max.as_secs())?
            .set_default(
                "controller.dependency_retry_secs",
                defaults.dependency_retry.as_secs(),
            )?
            .set_default("workflow.system_namespace", workflow.system_namespace)?
            .set_default("workflow.max_attempts", workflow.max_attempts as u64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KEEL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check required keys and build the typed configuration
    pub fn resolve(self) -> Result<DaemonConfig, ConfigError> {
        let mut missing = Vec::new();

        let catalog_path = self.catalog.path.filter(|p| !p.as_os_str().is_empty());
        if catalog_path.is_none() {
            missing.push("catalog.path".to_string());
        }

        let registry = self.workflow.registry;
        let credentials = match (registry.server, registry.username, registry.password) {
            (None, None, None) => None,
            (Some(server), Some(username), Some(password)) => Some(RegistryCredentials {
                server,
                username,
                password,
            }),
            (server, username, password) => {
                for (key, value) in [
                    ("workflow.registry.server", server.is_none()),
                    ("workflow.registry.username", username.is_none()),
                    ("workflow.registry.password", password.is_none()),
                ] {
                    if value {
                        missing.push(key.to_string());
                    }
                }
                None
            }
        };

        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }
        let Some(catalog_path) = catalog_path else {
            return Err(ConfigError::MissingKeys(vec!["catalog.path".to_string()]));
        };

        let defaults = ControllerConfig::default();
        let raw = self.controller;
        let workers = raw.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "controller.workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let resync_interval = match raw.resync_interval_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.resync_interval,
        };

        let max_attempts = self
            .workflow
            .max_attempts
            .unwrap_or(WorkflowConfig::default().max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "workflow.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(DaemonConfig {
            controller: ControllerConfig {
                workers,
                resync_interval,
                backoff_base: raw
                    .backoff_base_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff_base),
                backoff_max: raw
                    .backoff_max_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.backoff_max),
                dependency_retry: raw
                    .dependency_retry_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.dependency_retry),
            },
            workflow: WorkflowConfig {
                system_namespace: self
                    .workflow
                    .system_namespace
                    .unwrap_or_else(|| DEFAULT_SYSTEM_NAMESPACE.to_string()),
                max_attempts,
                credentials,
            },
            catalog_path,
            bootstrap_path: self.bootstrap.path,
            logging: self.logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_apply_when_only_catalog_is_given() {
        let config = RawDaemonConfig::load(None, env(&[("KEEL_CATALOG__PATH", "/srv/catalog")]))
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(config.catalog_path, PathBuf::from("/srv/catalog"));
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.resync_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.workflow.system_namespace, "keel-system");
        assert_eq!(config.workflow.max_attempts, 5);
        assert!(config.workflow.credentials.is_none());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_missing_keys_reported_together() {
        let err = RawDaemonConfig::load(
            None,
            env(&[("KEEL_WORKFLOW__REGISTRY__SERVER", "registry.example.com")]),
        )
        .unwrap()
        .resolve()
        .unwrap_err();

        match err {
            ConfigError::MissingKeys(keys) => assert_eq!(
                keys,
                vec![
                    "catalog.path",
                    "workflow.registry.username",
                    "workflow.registry.password"
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_file_layer_then_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.json");
        fs::write(
            &path,
            r#"{
                "catalog": {"path": "/from/file"},
                "controller": {"workers": 4, "resync_interval_secs": 0},
                "workflow": {
                    "max_attempts": 3,
                    "registry": {"server": "r.example.com", "username": "ci", "password": "s3cret"}
                },
                "logging": {"level": "debug"}
            }"#,
        )
        .unwrap();

        let config = RawDaemonConfig::load(
            Some(&path),
            env(&[("KEEL_CONTROLLER__WORKERS", "8")]),
        )
        .unwrap()
        .resolve()
        .unwrap();

        assert_eq!(config.catalog_path, PathBuf::from("/from/file"));
        assert_eq!(config.controller.workers, 8);
        assert_eq!(config.controller.resync_interval, None);
        assert_eq!(config.workflow.max_attempts, 3);
        assert_eq!(config.logging.level, "debug");
        let credentials = config.workflow.credentials.unwrap();
        assert_eq!(credentials.username, "ci");
        assert!(!format!("{:?}", credentials).contains("s3cret"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = RawDaemonConfig::load(
            None,
            env(&[
                ("KEEL_CATALOG__PATH", "/srv/catalog"),
                ("KEEL_CONTROLLER__WORKERS", "0"),
            ]),
        )
        .unwrap()
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "controller.workers"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawDaemonConfig::load(Some(&dir.path().join("absent.toml")), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
