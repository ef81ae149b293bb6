//! DNS resolution with per-address policy checks.
//!
//! A hostname is allowed only when **every** address it resolves to passes the
//! [`NetworkPolicy`]. Nothing is cached; each call re-resolves so a rebinding
//! between requests is seen by the next check.

use std::cmp::Ordering;
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::net::lookup_host;
use tokio::time::timeout;

use crate::policy::{NetworkPolicy, normalize_host};
use crate::types::{DocFetchError, ErrorCode, ValidationResult};

pub type ResolveFut<'a> = Pin<Box<dyn Future<Output = io::Result<Vec<IpAddr>>> + Send + 'a>>;

/// Hostname lookup. Implementations return every address for the name.
pub trait Resolver: Send + Sync {
    fn lookup<'a>(&'a self, host: &'a str, port: u16) -> ResolveFut<'a>;
}

/// System resolver (`getaddrinfo` through tokio) with a lookup timeout.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl Resolver for SystemResolver {
    fn lookup<'a>(&'a self, host: &'a str, port: u16) -> ResolveFut<'a> {
        Box::pin(async move {
            let addrs = timeout(self.timeout, lookup_host((host, port)))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dns lookup timed out"))??;
            Ok(addrs.map(|addr| addr.ip()).collect())
        })
    }
}

/// Resolve `host` and check every returned address against `policy`.
pub async fn resolve_and_check(
    host: &str,
    port: u16,
    policy: &NetworkPolicy,
    resolver: &dyn Resolver,
) -> ValidationResult {
    let host = normalize_host(host);

    let mut addrs = match resolver.lookup(&host, port).await {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(host = %host, error = %e, "DNS resolution failed");
            return ValidationResult::Denied(
                DocFetchError::new(
                    ErrorCode::DnsFailed,
                    format!("resolution failed for {host}: {e}"),
                )
                .with_detail("host", &host)
                .with_detail("error", e.to_string()),
            );
        }
    };

    if addrs.is_empty() {
        tracing::warn!(host = %host, "DNS resolution returned no addresses");
        return ValidationResult::Denied(
            DocFetchError::new(
                ErrorCode::DnsFailed,
                format!("resolution failed for {host}: no addresses"),
            )
            .with_detail("host", &host),
        );
    }

    sort_ips(&mut addrs);
    addrs.dedup();

    for ip in &addrs {
        if let Some(block) = policy.check_ip(*ip) {
            tracing::warn!(
                host = %host,
                ip = %ip,
                rule = %block.rule_text(),
                "Blocked IP resolution"
            );
            return ValidationResult::Denied(
                DocFetchError::new(
                    ErrorCode::SsrfBlocked,
                    format!("blocked IP address: {host} resolved to {block}"),
                )
                .with_detail("host", &host)
                .with_detail("blocked_ip", ip.to_string())
                .with_detail("rule", block.rule_text()),
            );
        }
    }

    ValidationResult::Allowed { addrs }
}

fn sort_ips(ips: &mut [IpAddr]) {
    ips.sort_by(|a, b| match (a, b) {
        (IpAddr::V6(a6), IpAddr::V6(b6)) => a6.octets().cmp(&b6.octets()),
        (IpAddr::V4(a4), IpAddr::V4(b4)) => a4.octets().cmp(&b4.octets()),
        (IpAddr::V6(_), IpAddr::V4(_)) => Ordering::Less,
        (IpAddr::V4(_), IpAddr::V6(_)) => Ordering::Greater,
    });
}

/// DNS hook for the pooled HTTP client.
///
/// The client resolves hostnames through this hook when it opens a
/// connection, so the socket only ever connects to addresses that passed the
/// policy at that moment. IP-literal URLs bypass DNS and are covered by the
/// validator.
pub struct GuardedDns {
    policy: Arc<NetworkPolicy>,
    resolver: Arc<dyn Resolver>,
}

impl GuardedDns {
    #[must_use]
    pub fn new(policy: Arc<NetworkPolicy>, resolver: Arc<dyn Resolver>) -> Self {
        Self { policy, resolver }
    }
}

impl Resolve for GuardedDns {
    fn resolve(&self, name: Name) -> Resolving {
        let policy = Arc::clone(&self.policy);
        let resolver = Arc::clone(&self.resolver);
        let host = name.as_str().to_string();
        Box::pin(async move {
            match resolve_and_check(&host, 0, &policy, resolver.as_ref()).await {
                ValidationResult::Allowed { addrs } => {
                    let addrs: Addrs = Box::new(
                        addrs
                            .into_iter()
                            .map(|ip| SocketAddr::new(ip, 0))
                            .collect::<Vec<_>>()
                            .into_iter(),
                    );
                    Ok(addrs)
                }
                ValidationResult::Denied(err) => {
                    Err(Box::new(err) as Box<dyn StdError + Send + Sync>)
                }
            }
        })
    }
}
