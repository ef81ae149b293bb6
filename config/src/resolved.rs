//! Resolution of the boundary config into runtime types.
//!
//! Every default is applied and every value checked here, once. Downstream
//! code receives types without `Option` fields.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use docfetch_fetch::{FetchLimits, HttpClientSettings, NetworkPolicy, PolicyError};

use crate::{ConfigError, DocfetchConfig};

pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["*"];

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub policy: NetworkPolicy,
    pub limits: FetchLimits,
    pub http: HttpClientSettings,
    pub max_redirects: u32,
    pub conversion: ConversionSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    /// Cross-origin allowlist; `"*"` allows any origin, empty disables.
    pub cors_origins: Vec<String>,
}

impl ResolvedConfig {
    pub fn from_config(config: &DocfetchConfig) -> Result<Self, ConfigError> {
        let limits_cfg = config.limits.clone().unwrap_or_default();
        let http_cfg = config.http.clone().unwrap_or_default();
        let security_cfg = config.security.clone().unwrap_or_default();
        let server_cfg = config.server.clone().unwrap_or_default();
        let converter_cfg = config.converter.clone().unwrap_or_default();

        let limits = FetchLimits {
            max_bytes: positive(
                "limits.max_file_size",
                limits_cfg.max_file_size,
                FetchLimits::DEFAULT_MAX_BYTES,
            )?,
            max_memory_growth_mb: positive(
                "limits.max_memory_growth_mb",
                limits_cfg.max_memory_growth_mb,
                FetchLimits::DEFAULT_MAX_MEMORY_GROWTH_MB,
            )?,
            chunk_size: positive(
                "limits.chunk_size",
                limits_cfg.chunk_size,
                FetchLimits::DEFAULT_CHUNK_SIZE,
            )?,
            download_timeout: seconds(
                "limits.download_timeout_secs",
                limits_cfg.download_timeout_secs,
                FetchLimits::DEFAULT_DOWNLOAD_TIMEOUT,
            )?,
        };

        let http = HttpClientSettings {
            user_agent: http_cfg
                .user_agent
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(HttpClientSettings::default_user_agent),
            connect_timeout: seconds(
                "http.connect_timeout_secs",
                http_cfg.connect_timeout_secs,
                HttpClientSettings::DEFAULT_CONNECT_TIMEOUT,
            )?,
            request_timeout: seconds(
                "http.request_timeout_secs",
                http_cfg.request_timeout_secs,
                HttpClientSettings::DEFAULT_REQUEST_TIMEOUT,
            )?,
            max_connections: positive(
                "http.max_connections",
                http_cfg.max_connections,
                HttpClientSettings::DEFAULT_MAX_CONNECTIONS,
            )?,
            max_keepalive_connections: http_cfg
                .max_keepalive_connections
                .unwrap_or(HttpClientSettings::DEFAULT_MAX_KEEPALIVE_CONNECTIONS),
        };

        let mut builder = NetworkPolicy::builder()
            .block_hosts(security_cfg.blocked_hosts)
            .block_cidrs(security_cfg.blocked_cidrs)
            .suspicious_substrings(security_cfg.suspicious_substrings);
        if let Some(ports) = security_cfg.allowed_ports {
            builder = builder.allowed_ports(ports);
        }
        let policy = builder.build().map_err(|e| ConfigError::Invalid {
            field: match e {
                PolicyError::InvalidCidr(_) => "security.blocked_cidrs",
                PolicyError::NoAllowedPorts => "security.allowed_ports",
            },
            reason: e.to_string(),
        })?;

        let conversion = ConversionSettings {
            program: converter_cfg
                .program
                .filter(|p| !p.trim().is_empty())
                .map_or_else(|| PathBuf::from("markitdown"), PathBuf::from),
            args: converter_cfg.args,
            timeout: seconds(
                "limits.conversion_timeout_secs",
                limits_cfg.conversion_timeout_secs,
                DEFAULT_CONVERSION_TIMEOUT,
            )?,
        };

        let bind_text = server_cfg.bind.as_deref().unwrap_or(DEFAULT_BIND);
        let bind = bind_text
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "server.bind",
                reason: format!("{bind_text}: {e}"),
            })?;

        let cors_origins: Vec<String> = server_cfg.cors_origins.map_or_else(
            || DEFAULT_CORS_ORIGINS.iter().map(ToString::to_string).collect(),
            |origins| {
                origins
                    .into_iter()
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            },
        );
        if let Some(bad) = cors_origins
            .iter()
            .find(|o| *o != "*" && !(o.starts_with("http://") || o.starts_with("https://")))
        {
            return Err(ConfigError::Invalid {
                field: "server.cors_origins",
                reason: format!("{bad}: expected \"*\" or an http(s) origin"),
            });
        }

        Ok(Self {
            policy,
            limits,
            http,
            max_redirects: http_cfg.max_redirects.unwrap_or(0),
            conversion,
            server: ServerSettings { bind, cors_origins },
        })
    }
}

fn positive<T>(field: &'static str, value: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: Copy + PartialEq + Default,
{
    match value {
        Some(v) if v == T::default() => Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        }),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn seconds(
    field: &'static str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs = positive(field, value, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
