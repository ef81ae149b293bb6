//! Network policy: the static allow/deny data every check consults.
//!
//! A [`NetworkPolicy`] is built once at startup and only read afterwards. It
//! holds blocked hostnames, blocked CIDR ranges, the destination port
//! allowlist, and substrings that mark a hostname as suspicious.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// Default blocked CIDR ranges with a short label for reporting.
pub const DEFAULT_BLOCKED_CIDRS: &[(&str, &str)] = &[
    // IPv4
    ("127.0.0.0/8", "loopback"),
    ("10.0.0.0/8", "private"),
    ("172.16.0.0/12", "private"),
    ("192.168.0.0/16", "private"),
    ("169.254.0.0/16", "link-local"),
    ("0.0.0.0/8", "unspecified"),
    ("100.64.0.0/10", "shared address space"),
    ("192.0.0.0/24", "IETF protocol assignments"),
    ("192.0.2.0/24", "documentation"),
    ("198.18.0.0/15", "benchmarking"),
    ("198.51.100.0/24", "documentation"),
    ("203.0.113.0/24", "documentation"),
    ("224.0.0.0/4", "multicast"),
    ("240.0.0.0/4", "reserved"),
    ("255.255.255.255/32", "broadcast"),
    // IPv6
    ("::1/128", "loopback"),
    ("::/128", "unspecified"),
    ("fc00::/7", "private"),
    ("fe80::/10", "link-local"),
    ("ff00::/8", "multicast"),
    ("2001:db8::/32", "documentation"),
    ("2001::/32", "Teredo"),
    ("2001:10::/28", "ORCHID"),
    ("2001::/23", "IETF protocol assignments"),
    ("2002::/16", "6to4"),
    ("100::/64", "discard-only"),
    ("64:ff9b:1::/48", "local-use translation"),
];

/// Hostnames that are always blocked, including cloud metadata endpoints.
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
];

/// Literal spellings of the local host, checked regardless of configuration.
pub const LOCALHOST_LITERALS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1"];

pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[80, 443, 8080, 8443];

pub const DEFAULT_SUSPICIOUS_SUBSTRINGS: &[&str] = &["metadata", "internal"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("allowed port list must not be empty")]
    NoAllowedPorts,
}

/// An address range in prefix notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
    text: String,
    label: String,
}

impl Cidr {
    pub fn parse(text: &str, label: impl Into<String>) -> Result<Self, PolicyError> {
        let invalid = || PolicyError::InvalidCidr(text.to_string());
        let (addr, prefix) = text.trim().split_once('/').ok_or_else(invalid)?;
        let network = addr.parse::<IpAddr>().map_err(|_| invalid())?;
        let prefix = prefix.parse::<u8>().map_err(|_| invalid())?;
        match network {
            IpAddr::V4(_) if prefix > 32 => return Err(invalid()),
            IpAddr::V6(_) if prefix > 128 => return Err(invalid()),
            _ => {}
        }
        Ok(Self {
            network,
            prefix,
            text: text.trim().to_string(),
            label: label.into(),
        })
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.network) {
            (IpAddr::V4(ipv4), IpAddr::V4(net)) => {
                prefix_match(&ipv4.octets(), &net.octets(), self.prefix)
            }
            (IpAddr::V6(ipv6), IpAddr::V6(net)) => {
                prefix_match(&ipv6.octets(), &net.octets(), self.prefix)
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn is_v4(&self) -> bool {
        self.network.is_ipv4()
    }
}

fn prefix_match(ip: &[u8], net: &[u8], prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let full = (prefix / 8) as usize;
    let rem = prefix % 8;

    if ip.len() < full || net.len() < full {
        return false;
    }

    if ip[..full] != net[..full] {
        return false;
    }

    if rem == 0 {
        return true;
    }

    let mask = 0xFFu8 << (8 - rem);
    ip[full] & mask == net[full] & mask
}

/// Why an address was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRule {
    /// Matched a blocked range.
    Network { cidr: String, label: String },
    /// Matched a semantic property (private, loopback, link-local, multicast).
    Property(&'static str),
}

/// A blocked address together with the rule it hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlock {
    pub ip: IpAddr,
    pub rule: BlockRule,
}

impl IpBlock {
    #[must_use]
    pub fn rule_text(&self) -> String {
        match &self.rule {
            BlockRule::Network { cidr, .. } => cidr.clone(),
            BlockRule::Property(name) => (*name).to_string(),
        }
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            BlockRule::Network { cidr, label } => write!(f, "{} ({label} range {cidr})", self.ip),
            BlockRule::Property(name) => write!(f, "{} ({name} address)", self.ip),
        }
    }
}

/// Immutable allow/deny data for outbound requests.
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    blocked_hosts: HashSet<String>,
    blocked_networks: Vec<Cidr>,
    allowed_ports: BTreeSet<u16>,
    suspicious_substrings: Vec<String>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            blocked_hosts: DEFAULT_BLOCKED_HOSTS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            blocked_networks: default_networks(),
            allowed_ports: DEFAULT_ALLOWED_PORTS.iter().copied().collect(),
            suspicious_substrings: DEFAULT_SUSPICIOUS_SUBSTRINGS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

fn default_networks() -> Vec<Cidr> {
    DEFAULT_BLOCKED_CIDRS
        .iter()
        .filter_map(|(text, label)| Cidr::parse(text, *label).ok())
        .collect()
}

impl NetworkPolicy {
    #[must_use]
    pub fn builder() -> NetworkPolicyBuilder {
        NetworkPolicyBuilder::default()
    }

    /// Check an address against the blocked ranges, then its semantic class.
    ///
    /// IPv4-mapped IPv6 addresses are checked as their IPv4 form as well.
    #[must_use]
    pub fn check_ip(&self, ip: IpAddr) -> Option<IpBlock> {
        if let IpAddr::V6(v6) = ip
            && let Some(v4) = v6.to_ipv4_mapped()
        {
            let mapped = IpAddr::V4(v4);
            if let Some(cidr) = self
                .blocked_networks
                .iter()
                .filter(|c| c.is_v4())
                .find(|c| c.contains(mapped))
            {
                return Some(network_block(ip, cidr));
            }
            if let Some(property) = ipv4_property(v4) {
                return Some(IpBlock {
                    ip,
                    rule: BlockRule::Property(property),
                });
            }
        }

        if let Some(cidr) = self.blocked_networks.iter().find(|c| c.contains(ip)) {
            return Some(network_block(ip, cidr));
        }

        let property = match ip {
            IpAddr::V4(v4) => ipv4_property(v4),
            IpAddr::V6(v6) => ipv6_property(v6),
        };
        property.map(|property| IpBlock {
            ip,
            rule: BlockRule::Property(property),
        })
    }

    /// Whether a lower-cased hostname is on the blocklist or a localhost literal.
    #[must_use]
    pub fn is_host_blocked(&self, host: &str) -> bool {
        LOCALHOST_LITERALS.contains(&host) || self.blocked_hosts.contains(host)
    }

    /// First suspicious substring contained in a lower-cased hostname.
    #[must_use]
    pub fn suspicious_pattern(&self, host: &str) -> Option<&str> {
        self.suspicious_substrings
            .iter()
            .find(|pattern| host.contains(pattern.as_str()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_port_allowed(&self, port: u16) -> bool {
        self.allowed_ports.contains(&port)
    }

    pub fn allowed_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.allowed_ports.iter().copied()
    }

    #[must_use]
    pub fn blocked_networks(&self) -> &[Cidr] {
        &self.blocked_networks
    }
}

fn network_block(ip: IpAddr, cidr: &Cidr) -> IpBlock {
    IpBlock {
        ip,
        rule: BlockRule::Network {
            cidr: cidr.as_str().to_string(),
            label: cidr.label().to_string(),
        },
    }
}

fn ipv4_property(ip: Ipv4Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if ip.is_multicast() {
        Some("multicast")
    } else {
        None
    }
}

fn ipv6_property(ip: Ipv6Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_unique_local() {
        Some("private")
    } else if ip.is_unicast_link_local() {
        Some("link-local")
    } else if ip.is_multicast() {
        Some("multicast")
    } else {
        None
    }
}

/// Builder that starts from the default policy and extends it.
///
/// Additional hosts, CIDRs and substrings are added on top of the defaults.
/// An explicit port list replaces the default allowlist.
#[derive(Debug, Clone, Default)]
pub struct NetworkPolicyBuilder {
    blocked_hosts: Vec<String>,
    blocked_cidrs: Vec<String>,
    allowed_ports: Option<Vec<u16>>,
    suspicious_substrings: Vec<String>,
}

impl NetworkPolicyBuilder {
    pub fn block_host(mut self, host: impl Into<String>) -> Self {
        self.blocked_hosts.push(host.into());
        self
    }

    pub fn block_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn block_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.blocked_cidrs.push(cidr.into());
        self
    }

    pub fn block_cidrs<I, S>(mut self, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_cidrs.extend(cidrs.into_iter().map(Into::into));
        self
    }

    pub fn allowed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_ports = Some(ports.into_iter().collect());
        self
    }

    pub fn suspicious_substring(mut self, pattern: impl Into<String>) -> Self {
        self.suspicious_substrings.push(pattern.into());
        self
    }

    pub fn suspicious_substrings<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suspicious_substrings
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<NetworkPolicy, PolicyError> {
        let mut policy = NetworkPolicy::default();

        for host in self.blocked_hosts {
            let host = normalize_host(&host);
            if !host.is_empty() {
                policy.blocked_hosts.insert(host);
            }
        }

        for text in &self.blocked_cidrs {
            policy.blocked_networks.push(Cidr::parse(text, "configured")?);
        }

        if let Some(ports) = self.allowed_ports {
            if ports.is_empty() {
                return Err(PolicyError::NoAllowedPorts);
            }
            policy.allowed_ports = ports.into_iter().collect();
        }

        for pattern in self.suspicious_substrings {
            let pattern = pattern.trim().to_ascii_lowercase();
            if !pattern.is_empty() && !policy.suspicious_substrings.contains(&pattern) {
                policy.suspicious_substrings.push(pattern);
            }
        }

        Ok(policy)
    }
}

/// Lower-case a hostname and drop brackets and a trailing root dot.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use super::{
        BlockRule, Cidr, DEFAULT_BLOCKED_CIDRS, NetworkPolicy, PolicyError, normalize_host,
    };

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn default_cidrs_all_parse() {
        let policy = NetworkPolicy::default();
        assert_eq!(policy.blocked_networks().len(), DEFAULT_BLOCKED_CIDRS.len());
    }

    #[test]
    fn every_default_range_blocks_its_network_address() {
        let policy = NetworkPolicy::default();
        for cidr in policy.blocked_networks() {
            let network: IpAddr = cidr.as_str().split('/').next().unwrap().parse().unwrap();
            assert!(
                policy.check_ip(network).is_some(),
                "{} should be blocked",
                cidr.as_str()
            );
        }
    }

    #[test]
    fn public_addresses_pass() {
        let policy = NetworkPolicy::default();
        assert!(policy.check_ip(v4(93, 184, 216, 34)).is_none());
        assert!(policy.check_ip(v4(8, 8, 8, 8)).is_none());
        let public_v6: IpAddr = "2606:2800:220:1:248:1893:25c8:1946".parse().unwrap();
        assert!(policy.check_ip(public_v6).is_none());
    }

    #[test]
    fn metadata_address_reports_link_local_range() {
        let policy = NetworkPolicy::default();
        let block = policy.check_ip(v4(169, 254, 169, 254)).unwrap();
        assert_eq!(
            block.rule,
            BlockRule::Network {
                cidr: "169.254.0.0/16".to_string(),
                label: "link-local".to_string()
            }
        );
        assert!(block.to_string().contains("link-local"));
    }

    #[test]
    fn ipv6_special_purpose_ranges_are_blocked() {
        let policy = NetworkPolicy::default();
        for (text, cidr) in [
            ("2001::1", "2001::/32"),
            ("2001:0:4136:e378:8000:63bf:3fff:fdd2", "2001::/32"),
            ("2001:10::1", "2001:10::/28"),
            ("2001:100::1", "2001::/23"),
            ("2002:7f00:1::1", "2002::/16"),
            ("100::1", "100::/64"),
            ("64:ff9b:1::1", "64:ff9b:1::/48"),
        ] {
            let ip: IpAddr = text.parse().unwrap();
            let block = policy.check_ip(ip).unwrap_or_else(|| panic!("{text} passed"));
            assert!(
                matches!(&block.rule, BlockRule::Network { cidr: c, .. } if c == cidr),
                "{text}: {block}"
            );
        }
        let outside: IpAddr = "2001:200::1".parse().unwrap();
        assert!(policy.check_ip(outside).is_none());
    }

    #[test]
    fn ipv4_mapped_ipv6_is_checked_as_ipv4() {
        let policy = NetworkPolicy::default();
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 1, 2, 3).to_ipv6_mapped());
        assert!(policy.check_ip(mapped).is_some());
        let mapped_public = IpAddr::V6(Ipv4Addr::new(93, 184, 216, 34).to_ipv6_mapped());
        assert!(policy.check_ip(mapped_public).is_none());
    }

    #[test]
    fn cidr_prefix_boundaries() {
        let cidr = Cidr::parse("172.16.0.0/12", "private").unwrap();
        assert!(cidr.contains(v4(172, 31, 255, 255)));
        assert!(!cidr.contains(v4(172, 32, 0, 0)));
        assert!(!cidr.contains(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn cidr_parse_rejects_bad_input() {
        assert!(Cidr::parse("10.0.0.0", "x").is_err());
        assert!(Cidr::parse("10.0.0.0/33", "x").is_err());
        assert!(Cidr::parse("::/129", "x").is_err());
        assert!(Cidr::parse("nope/8", "x").is_err());
    }

    #[test]
    fn builder_extends_defaults() {
        let policy = NetworkPolicy::builder()
            .block_host("Files.Example.COM")
            .block_cidr("93.184.216.0/24")
            .suspicious_substring("CORP")
            .build()
            .unwrap();
        assert!(policy.is_host_blocked("files.example.com"));
        assert!(policy.is_host_blocked("metadata.google.internal"));
        assert!(policy.check_ip(v4(93, 184, 216, 34)).is_some());
        assert_eq!(policy.suspicious_pattern("intranet.corp.example"), Some("corp"));
        assert_eq!(policy.suspicious_pattern("metadata.example.com"), Some("metadata"));
    }

    #[test]
    fn builder_port_list_replaces_defaults() {
        let policy = NetworkPolicy::builder()
            .allowed_ports([443])
            .build()
            .unwrap();
        assert!(policy.is_port_allowed(443));
        assert!(!policy.is_port_allowed(8080));
        assert_eq!(
            NetworkPolicy::builder().allowed_ports([]).build().unwrap_err(),
            PolicyError::NoAllowedPorts
        );
    }

    #[test]
    fn builder_reports_invalid_cidr() {
        let err = NetworkPolicy::builder()
            .block_cidr("300.0.0.0/8")
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::InvalidCidr("300.0.0.0/8".to_string()));
    }

    #[test]
    fn normalize_host_strips_brackets_and_root_dot() {
        assert_eq!(normalize_host("[::1]"), "::1");
        assert_eq!(normalize_host("LocalHost."), "localhost");
    }
}
