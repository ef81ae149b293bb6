//! URL security validation.
//!
//! Checks run in a fixed order and stop at the first failure, which decides
//! the reported reason:
//!
//! 1. parse, scheme is `http` or `https`, no userinfo
//! 2. explicit port is in the allowlist
//! 3. hostname is present
//! 4. hostname is not blocked or a localhost literal
//! 5. IP-literal hosts are not in a blocked range or class
//! 6. hostname contains no suspicious substring
//! 7. every resolved address passes the policy
use std::net::IpAddr;

use url::{Host, ParseError, Url};

use crate::policy::{NetworkPolicy, normalize_host};
use crate::resolve::{Resolver, resolve_and_check};
use crate::types::{DocFetchError, ErrorCode, ValidationResult};

/// Where a URL that passed the syntactic checks points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// IP-literal host, already checked.
    Literal(IpAddr),
    /// Hostname that still needs resolving.
    Domain { host: String, port: u16 },
}

/// Validate a URL against `policy`, resolving its hostname through `resolver`.
///
/// Never panics and never returns an error: malformed input is a denial.
pub async fn validate(
    raw_url: &str,
    policy: &NetworkPolicy,
    resolver: &dyn Resolver,
) -> ValidationResult {
    match check_syntax(raw_url, policy) {
        Ok(Target::Literal(ip)) => ValidationResult::Allowed { addrs: vec![ip] },
        Ok(Target::Domain { host, port }) => resolve_and_check(&host, port, policy, resolver).await,
        Err(err) => {
            tracing::warn!(url = %raw_url, code = ?err.code, reason = %err.message, "URL rejected");
            ValidationResult::Denied(err)
        }
    }
}

/// Steps 1 through 6: everything that does not touch the network.
pub fn check_syntax(raw_url: &str, policy: &NetworkPolicy) -> Result<Target, DocFetchError> {
    let url = parse_url(raw_url)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(DocFetchError::new(
                ErrorCode::InvalidScheme,
                format!("invalid scheme: {scheme}; only http and https are allowed"),
            )
            .with_detail("scheme", scheme));
        }
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(DocFetchError::new(
            ErrorCode::InvalidUrl,
            "invalid URL: userinfo is not allowed",
        ));
    }

    if let Some(port) = url.port_or_known_default()
        && !policy.is_port_allowed(port)
    {
        let allowed = policy
            .allowed_ports()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(DocFetchError::new(
            ErrorCode::PortBlocked,
            format!("port not allowed: {port}; permitted ports are {allowed}"),
        )
        .with_detail("port", port.to_string())
        .with_detail("allowed_ports", allowed));
    }

    let Some(host) = url.host() else {
        return Err(missing_host());
    };

    let (hostname, literal) = match host {
        Host::Domain(name) => (normalize_host(name), None),
        Host::Ipv4(ip) => (ip.to_string(), Some(IpAddr::V4(ip))),
        Host::Ipv6(ip) => (ip.to_string(), Some(IpAddr::V6(ip))),
    };
    if hostname.is_empty() {
        return Err(missing_host());
    }

    if policy.is_host_blocked(&hostname) {
        return Err(DocFetchError::new(
            ErrorCode::HostBlocked,
            format!("blocked hostname: {hostname}"),
        )
        .with_detail("host", &hostname));
    }

    if let Some(ip) = literal
        && let Some(block) = policy.check_ip(ip)
    {
        return Err(DocFetchError::new(
            ErrorCode::SsrfBlocked,
            format!("blocked IP address: {block}"),
        )
        .with_detail("blocked_ip", ip.to_string())
        .with_detail("rule", block.rule_text()));
    }

    if let Some(pattern) = policy.suspicious_pattern(&hostname) {
        return Err(DocFetchError::new(
            ErrorCode::SuspiciousHost,
            format!("suspicious hostname pattern: {hostname} contains '{pattern}'"),
        )
        .with_detail("host", &hostname)
        .with_detail("pattern", pattern));
    }

    Ok(match literal {
        Some(ip) => Target::Literal(ip),
        None => Target::Domain {
            host: hostname,
            port: url.port_or_known_default().unwrap_or(80),
        },
    })
}

fn parse_url(raw_url: &str) -> Result<Url, DocFetchError> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err(DocFetchError::new(
            ErrorCode::InvalidUrl,
            "invalid URL: empty input",
        ));
    }
    Url::parse(trimmed).map_err(|e| match e {
        ParseError::EmptyHost => missing_host(),
        other => DocFetchError::new(ErrorCode::InvalidUrl, format!("invalid URL: {other}"))
            .with_detail("url", trimmed),
    })
}

fn missing_host() -> DocFetchError {
    DocFetchError::new(ErrorCode::MissingHost, "missing hostname")
}
