//! docfetch configuration.
//!
//! [`DocfetchConfig`] is the boundary type: it mirrors the TOML file, every
//! field is optional, and environment overrides are applied on top of it.
//! [`ResolvedConfig`] is built from it once at startup and carries concrete
//! runtime types only.
//!
//! ```toml
//! [limits]
//! max_file_size = 52428800
//! download_timeout_secs = 30
//!
//! [security]
//! allowed_ports = [443]
//! blocked_hosts = ["files.corp.example"]
//! ```

mod resolved;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub use resolved::{ConversionSettings, ResolvedConfig, ServerSettings};

const ENV_CONFIG_PATH: &str = "DOCFETCH_CONFIG";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocfetchConfig {
    pub limits: Option<LimitsConfig>,
    pub http: Option<HttpConfig>,
    pub security: Option<SecurityConfig>,
    pub server: Option<ServerConfig>,
    pub converter: Option<ConverterConfig>,
}

/// Per-download ceilings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum body size in bytes.
    pub max_file_size: Option<u64>,
    pub max_memory_growth_mb: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub conversion_timeout_secs: Option<u64>,
    pub chunk_size: Option<usize>,
}

/// Pooled HTTP client settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_connections: Option<usize>,
    pub max_keepalive_connections: Option<usize>,
    /// 0 disables redirects.
    pub max_redirects: Option<u32>,
}

/// Network policy data. Lists extend the built-in defaults, except
/// `allowed_ports`, which replaces them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    pub allowed_ports: Option<Vec<u16>>,
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
    #[serde(default)]
    pub blocked_cidrs: Vec<String>,
    #[serde(default)]
    pub suspicious_substrings: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: Option<String>,
    /// Origins allowed to call the routes from a browser. `"*"` allows any;
    /// an empty list disables cross-origin access.
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterConfig {
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl DocfetchConfig {
    /// Load the config file and apply environment overrides.
    ///
    /// The file is `explicit` if given, else `$DOCFETCH_CONFIG`, else
    /// `<config dir>/docfetch/config.toml`. An explicitly named file must
    /// exist; a missing default file means built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("No config file found; using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::from_toml(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `DOCFETCH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (var, v))
        };

        let limits = self.limits.get_or_insert_with(LimitsConfig::default);
        if let Some((var, v)) = get("DOCFETCH_MAX_FILE_SIZE") {
            limits.max_file_size = Some(parse_env(var, &v)?);
        }
        if let Some((var, v)) = get("DOCFETCH_MAX_MEMORY_GROWTH_MB") {
            limits.max_memory_growth_mb = Some(parse_env(var, &v)?);
        }
        if let Some((var, v)) = get("DOCFETCH_DOWNLOAD_TIMEOUT") {
            limits.download_timeout_secs = Some(parse_env(var, &v)?);
        }
        if let Some((var, v)) = get("DOCFETCH_CONVERSION_TIMEOUT") {
            limits.conversion_timeout_secs = Some(parse_env(var, &v)?);
        }
        if let Some((var, v)) = get("DOCFETCH_CHUNK_SIZE") {
            limits.chunk_size = Some(parse_env(var, &v)?);
        }

        let http = self.http.get_or_insert_with(HttpConfig::default);
        if let Some((var, v)) = get("DOCFETCH_MAX_CONNECTIONS") {
            http.max_connections = Some(parse_env(var, &v)?);
        }
        if let Some((var, v)) = get("DOCFETCH_MAX_KEEPALIVE_CONNECTIONS") {
            http.max_keepalive_connections = Some(parse_env(var, &v)?);
        }

        if let Some((var, v)) = get("DOCFETCH_ALLOWED_PORTS") {
            let ports = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| parse_env::<u16>(var, p))
                .collect::<Result<Vec<_>, _>>()?;
            self.security
                .get_or_insert_with(SecurityConfig::default)
                .allowed_ports = Some(ports);
        }

        if let Some((_, v)) = get("DOCFETCH_BIND") {
            self.server.get_or_insert_with(ServerConfig::default).bind = Some(v);
        }
        if let Some((_, v)) = get("DOCFETCH_CORS_ORIGINS") {
            let origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            self.server
                .get_or_insert_with(ServerConfig::default)
                .cors_origins = Some(origins);
        }
        if let Some((_, v)) = get("DOCFETCH_CONVERTER") {
            self.converter
                .get_or_insert_with(ConverterConfig::default)
                .program = Some(v);
        }

        Ok(())
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docfetch").join("config.toml"))
}
