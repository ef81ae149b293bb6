//! `HttpTransport` against a local mock server.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docfetch_fetch::{
    ByteSink, ErrorCategory, ErrorCode, FetchLimits, FetchOutcome, Fetcher, HttpClientSettings,
    HttpTransport, NetworkPolicy, ResolveFut, Resolver, SinkFut, SupportedMime, Transport,
    TransportResponse,
};
use futures_util::StreamExt;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct MapResolver(HashMap<&'static str, Vec<IpAddr>>);

impl Resolver for MapResolver {
    fn lookup<'a>(&'a self, host: &'a str, _port: u16) -> ResolveFut<'a> {
        let result = self
            .0
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "NXDOMAIN"));
        Box::pin(async move { result })
    }
}

/// Answers with a public address once, then with loopback.
#[derive(Default)]
struct RebindingResolver {
    lookups: AtomicUsize,
}

impl Resolver for RebindingResolver {
    fn lookup<'a>(&'a self, _host: &'a str, _port: u16) -> ResolveFut<'a> {
        let ip = if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        Box::pin(async move { Ok(vec![ip]) })
    }
}

struct NullSink;

impl ByteSink for NullSink {
    fn write_document<'a>(&'a mut self, _bytes: Vec<u8>, _mime: SupportedMime) -> SinkFut<'a> {
        panic!("nothing should be written");
    }
}

fn settings() -> HttpClientSettings {
    HttpClientSettings {
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        ..HttpClientSettings::default()
    }
}

async fn collect(response: TransportResponse) -> Vec<u8> {
    let mut body = Vec::new();
    let mut stream = response.body;
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    body
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).unwrap()
}

#[tokio::test]
async fn streams_body_with_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .and(header("user-agent", HttpClientSettings::default_user_agent().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
        .mount(&server)
        .await;

    let transport = HttpTransport::unguarded(&settings()).unwrap();
    let response = transport.get(&url(&server, "/doc.pdf")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_length, Some(13));
    assert_eq!(collect(response).await, b"%PDF-1.4 body");
}

#[tokio::test]
async fn redirects_are_returned_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .expect(0)
        .mount(&server)
        .await;

    let transport = HttpTransport::unguarded(&settings()).unwrap();
    let response = transport.get(&url(&server, "/old")).await.unwrap();
    assert_eq!(response.status, 302);
    assert_eq!(response.location.as_deref(), Some("/new"));
}

#[tokio::test]
async fn error_statuses_are_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = HttpTransport::unguarded(&settings()).unwrap();
    let response = transport.get(&url(&server, "/any")).await.unwrap();
    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn guarded_dns_never_connects_to_blocked_addresses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .mount(&server)
        .await;

    let port = server.address().port();
    let resolver = MapResolver(HashMap::from([(
        "docs.test",
        vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
    )]));
    let transport = HttpTransport::guarded(
        &settings(),
        Arc::new(NetworkPolicy::default()),
        Arc::new(resolver),
    )
    .unwrap();

    let target = Url::parse(&format!("http://docs.test:{port}/")).unwrap();
    let err = transport.get(&target).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SsrfBlocked, "{err}");
    assert_eq!(err.category(), ErrorCategory::PolicyRejection);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn rebinding_at_connect_time_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("%PDF-1.7 secret"))
        .mount(&server)
        .await;

    let port = server.address().port();
    let policy = Arc::new(
        NetworkPolicy::builder()
            .allowed_ports([port])
            .build()
            .unwrap(),
    );
    let resolver = Arc::new(RebindingResolver::default());
    let transport = HttpTransport::guarded(
        &settings(),
        Arc::clone(&policy),
        Arc::clone(&resolver) as Arc<dyn Resolver>,
    )
    .unwrap();
    let fetcher = Fetcher::new(policy, resolver, Arc::new(transport));

    let outcome = fetcher
        .fetch(
            &format!("http://docs.test:{port}/a.pdf"),
            &FetchLimits::default(),
            &mut NullSink,
        )
        .await;

    let err = match outcome {
        FetchOutcome::Rejected(err) => err,
        other => panic!("expected rejection, got {other:?}"),
    };
    assert_eq!(err.code, ErrorCode::SsrfBlocked, "{err}");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn connection_ceiling_holds_until_body_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let transport = HttpTransport::unguarded(&HttpClientSettings {
        max_connections: 1,
        ..settings()
    })
    .unwrap();
    let target = url(&server, "/a");

    let first = transport.get(&target).await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(200), transport.get(&target)).await;
    assert!(blocked.is_err(), "second request should wait for a permit");

    drop(first);
    let second = transport.get(&target).await.unwrap();
    assert_eq!(collect(second).await, b"ok");
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = HttpTransport::unguarded(&settings()).unwrap();
    let target = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let err = transport.get(&target).await.unwrap_err();
    assert_eq!(err.code, docfetch_fetch::ErrorCode::Network);
    assert_eq!(err.message, "connection error");
}
