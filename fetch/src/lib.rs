//! SSRF-safe URL validation and bounded streaming fetch.
//!
//! Pipeline: [`validate`] checks the URL against a [`NetworkPolicy`] and
//! resolves its hostname through a [`Resolver`]; [`Fetcher::fetch`]
//! re-validates, streams the body under [`FetchLimits`], [`sniff`]s the bytes,
//! and writes accepted documents to a [`ByteSink`].
//!
//! # Security
//!
//! - Only `http` and `https` URLs on allowlisted ports are fetched.
//! - A hostname is rejected if **any** of its addresses is loopback, private,
//!   link-local, multicast, reserved, or otherwise in a blocked range.
//! - The pooled HTTP client resolves through [`GuardedDns`], so the address a
//!   socket connects to has passed the same policy.
//! - Redirects are not followed unless enabled; each hop is re-validated.

mod http;
mod memory;
mod policy;
mod resolve;
mod sink;
mod sniff;
mod transport;
mod types;
mod validate;

pub use http::Fetcher;
pub use memory::{MemoryProbe, ProcessMemory};
pub use policy::{
    BlockRule, Cidr, DEFAULT_ALLOWED_PORTS, DEFAULT_BLOCKED_CIDRS, DEFAULT_BLOCKED_HOSTS,
    DEFAULT_SUSPICIOUS_SUBSTRINGS, IpBlock, LOCALHOST_LITERALS, NetworkPolicy,
    NetworkPolicyBuilder, PolicyError, normalize_host,
};
pub use resolve::{GuardedDns, ResolveFut, Resolver, SystemResolver, resolve_and_check};
pub use sink::{ByteSink, SinkFut, TempFileSink};
pub use sniff::{SupportedMime, sniff};
pub use transport::{
    BodyStream, HttpClientSettings, HttpTransport, Transport, TransportFut, TransportResponse,
};
pub use types::{
    DocFetchError, ErrorCategory, ErrorCode, ErrorDetails, FetchLimits, FetchOutcome,
    FetchedDocument, ValidationResult,
};
pub use validate::{Target, check_syntax, validate};
