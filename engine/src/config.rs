//! Engine configuration loading
//!
//! Loads configuration from `~/.config/imo/config.toml` (or `IMO_CONFIG` env).
//! Every field has a default, so an absent file yields a working engine.

use crate::errors::{ImoError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Root configuration, read once at startup
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ImoConfig {
    /// `allowlist:<patterns>` or `denylist:<patterns>`; absent means no gate
    #[serde(default)]
    pub domain_restriction: Option<String>,

    /// Script type treated as an import map (`importmap`, `systemjs-importmap`)
    #[serde(default = "default_import_map_type")]
    pub import_map_type: String,

    /// Mirror every override into a cookie with the same key/value
    #[serde(default)]
    pub server_cookie: bool,

    /// Never inject into the document; programmatic queries still work
    #[serde(default)]
    pub server_only: bool,

    /// Name of the query parameter carrying a JSON override map
    #[serde(default = "default_query_param")]
    pub query_param: String,

    /// Template for bare-port overrides, with `{port}` and `{moduleName}`
    #[serde(default)]
    pub default_port_template: Option<String>,

    /// Per-port templates with `{moduleName}`, keyed by port
    #[serde(default)]
    pub port_templates: BTreeMap<String, String>,
}

fn default_import_map_type() -> String {
    "importmap".to_string()
}

fn default_query_param() -> String {
    "imo".to_string()
}

impl Default for ImoConfig {
    fn default() -> Self {
        Self {
            domain_restriction: None,
            import_map_type: default_import_map_type(),
            server_cookie: false,
            server_only: false,
            query_param: default_query_param(),
            default_port_template: None,
            port_templates: BTreeMap::new(),
        }
    }
}

impl ImoConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "IMO_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `IMO_CONFIG` environment variable
    /// 2. `~/.config/imo/config.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "imo config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ImoError::config_with_source(format!("failed to read config at {}", path.display()), e)
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: ImoConfig = toml::from_str(contents)
            .map_err(|e| ImoError::config_with_source("failed to parse config", e))?;

        cfg.validate();
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("imo")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Warn about settings that will behave surprisingly. Never fails.
    fn validate(&self) {
        if let Some(template) = &self.default_port_template
            && !template.contains("{port}")
        {
            tracing::warn!(
                template = %template,
                "default_port_template has no {{port}} placeholder; every port maps to the same URL"
            );
        }

        for (port, template) in &self.port_templates {
            if port.parse::<u16>().is_err() {
                tracing::warn!(port = %port, "port_templates key is not a port number");
            }
            if !template.contains("{moduleName}") {
                tracing::warn!(
                    port = %port,
                    "port template has no {{moduleName}} placeholder"
                );
            }
        }

        if self.query_param.trim().is_empty() {
            tracing::warn!("query_param is empty; the query-parameter channel is disabled");
        }
    }
}
