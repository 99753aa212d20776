use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
};
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

use unfurl_backend::{
    AppState,
    config::Config,
    rate_limit::{ManualClock, RateLimiter},
    router::create_router,
    unfurl::{
        DEFAULT_USER_AGENT, DnsHostGuard, FetchPolicy, HostGuard, Resolve, SsrfError,
        UnfurlEngine,
    },
    utils::issue_token,
};

const SECRET: &str = "integration-secret";

/// Answers lookups from a fixed table.
struct StaticResolver(HashMap<&'static str, Vec<IpAddr>>);

impl Resolve for StaticResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        let answer = self
            .0
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "NXDOMAIN"));
        Box::pin(async move { answer })
    }
}

/// `*.test` hosts are pinned to the local mock server; everything else goes
/// through the real guard backed by [`StaticResolver`].
struct MockSiteGuard {
    inner: DnsHostGuard,
}

impl HostGuard for MockSiteGuard {
    fn admit<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<IpAddr, SsrfError>> {
        if url.host_str().is_some_and(|h| h.ends_with(".test")) {
            return Box::pin(async { Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)) });
        }
        self.inner.admit(url)
    }
}

fn config(requests_per_ip: u32) -> Config {
    Config {
        jwt_secret: SECRET.into(),
        server_host: "127.0.0.1".into(),
        server_port: 0,
        api_base_uri: "/api".into(),
        rate_limit_window_secs: 60,
        rate_limit_requests: requests_per_ip,
        rate_limit_sweep_secs: 60,
        unfurl_user_agent: DEFAULT_USER_AGENT.into(),
        trust_proxy_headers: false,
    }
}

fn app_with(config: Config, clock: Arc<ManualClock>) -> Router {
    let resolver = StaticResolver(HashMap::from([
        ("internal.example.com", vec!["127.0.0.1".parse().unwrap()]),
        ("public.example.com", vec!["93.184.216.34".parse().unwrap()]),
    ]));
    let guard = MockSiteGuard {
        inner: DnsHostGuard::new(Arc::new(resolver)),
    };
    let policy = FetchPolicy {
        timeout: Duration::from_secs(2),
        ..FetchPolicy::default()
    };

    create_router(AppState {
        config,
        limiter: Arc::new(RateLimiter::with_clock(clock, Duration::from_secs(60))),
        unfurler: UnfurlEngine::with_guard(Arc::new(guard), policy),
    })
}

fn app() -> Router {
    app_with(config(1000), Arc::new(ManualClock::at(1_000_000)))
}

fn bearer(user: &str) -> String {
    let (token, _) = issue_token(user, Duration::from_secs(3600), &config(1000)).unwrap();
    format!("Bearer {token}")
}

fn unfurl_request(user: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/unfurl")
        .header(header::AUTHORIZATION, bearer(user))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn unfurl_json(user: &str, body: Value) -> Request<Body> {
    unfurl_request(user, body.to_string())
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, json_body(response).await)
}

#[tokio::test]
async fn test_ping_is_public() {
    let request = Request::builder().uri("/api/ping").body(Body::empty()).unwrap();
    let (status, body) = send(&app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unfurl_requires_token() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/unfurl")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"url": "https://example.com"}).to_string()))
        .unwrap();
    let (status, _) = send(&app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/api/unfurl")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let (status, body) = send(&app(), unfurl_request("u1", "{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid JSON body.");
}

#[tokio::test]
async fn test_validation_errors() {
    let app = app();

    let (status, body) = send(&app, unfurl_json("u1", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "URL is required.");

    let (status, body) = send(&app, unfurl_json("u1", json!({"url": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "URL is required.");

    let (status, body) = send(&app, unfurl_json("u1", json!({"url": "not a url"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid URL format.");

    let (status, body) =
        send(&app, unfurl_json("u1", json!({"url": "javascript:alert(1)"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Only http and https URLs are allowed.");
}

#[tokio::test]
async fn test_private_targets_get_generic_message() {
    let app = app();

    for target in [
        "http://127.0.0.1/admin",
        "http://[::1]/",
        "http://localhost:8080/",
        "http://internal.example.com/",
        "http://unknown.example.com/",
    ] {
        let (status, body) = send(&app, unfurl_json("u1", json!({"url": target}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{target}");
        assert_eq!(body["error"], "Could not fetch URL.", "{target}");
    }
}

#[tokio::test]
async fn test_unfurl_follows_redirect_and_extracts_preview() {
    let server = MockServer::start().await;
    let port = server.address().port();
    Mock::given(path("/a"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", format!("http://other.test:{port}/b").as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><head>
                <meta property="og:title" content="Example">
                <meta name="description" content="A <b>demo</b> page">
                <meta property="og:image" content="/img/cover.png">
                <meta property="og:site_name" content="Demo Site">
            </head></html>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    let start = format!("http://site.test:{port}/a");
    let (status, body) = send(&app(), unfurl_json("u1", json!({"url": start}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], format!("http://other.test:{port}/b"));
    assert_eq!(body["title"], "Example");
    assert_eq!(body["description"], "A demo page");
    assert_eq!(body["image_url"], format!("http://other.test:{port}/img/cover.png"));
    assert_eq!(body["site_name"], "Demo Site");
}

#[tokio::test]
async fn test_redirect_into_private_host_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(path("/hop"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "http://169.254.169.254/latest"),
        )
        .mount(&server)
        .await;

    let start = format!("http://site.test:{}/hop", server.address().port());
    let (status, body) = send(&app(), unfurl_json("u1", json!({"url": start}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Could not fetch URL.");
}

#[tokio::test]
async fn test_too_many_redirects() {
    let server = MockServer::start().await;
    for (from, to) in [("/r1", "/r2"), ("/r2", "/r3"), ("/r3", "/r4"), ("/r4", "/r5")] {
        Mock::given(path(from))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", to))
            .mount(&server)
            .await;
    }

    let start = format!("http://site.test:{}/r1", server.address().port());
    let (status, body) = send(&app(), unfurl_json("u1", json!({"url": start}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Too many redirects.");
}

#[tokio::test]
async fn test_non_html_and_error_status() {
    let server = MockServer::start().await;
    Mock::given(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 1})))
        .mount(&server)
        .await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = app();
    let port = server.address().port();

    let data = format!("http://site.test:{port}/data");
    let (status, body) = send(&app, unfurl_json("u1", json!({"url": data}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "URL does not point to an HTML page.");

    let gone = format!("http://site.test:{port}/gone");
    let (status, body) = send(&app, unfurl_json("u1", json!({"url": gone}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "The page returned an error.");
}

#[tokio::test]
async fn test_per_user_unfurl_limit() {
    let clock = Arc::new(ManualClock::at(1_000_000));
    let app = app_with(config(1000), clock.clone());

    // 每次调用都会消耗额度，即使请求体无效
    for _ in 0..30 {
        let (status, _) = send(&app, unfurl_request("busy", "{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let response = app
        .clone()
        .oneshot(unfurl_request("busy", "{"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    assert_eq!(json_body(response).await["error"], "Too many requests");

    // 其他用户不受影响
    let (status, _) = send(&app, unfurl_request("idle", "{")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 窗口滑过之后恢复
    clock.advance(60_001);
    let (status, _) = send(&app, unfurl_request("busy", "{")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn ping_from(peer: [u8; 4], spoofed: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/ping")
        .header("x-real-ip", spoofed)
        .extension(ConnectInfo(SocketAddr::from((peer, 40000))))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_per_ip_limit_applies_before_auth() {
    let app = app_with(config(2), Arc::new(ManualClock::at(1_000_000)));
    let peer = [198, 51, 100, 4];

    assert_eq!(send(&app, ping_from(peer, "203.0.113.1")).await.0, StatusCode::OK);
    assert_eq!(send(&app, ping_from(peer, "203.0.113.2")).await.0, StatusCode::OK);

    // 默认不信任代理头部，轮换头部无法绕过限流
    let response = app
        .clone()
        .oneshot(ping_from(peer, "203.0.113.3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let other_peer = ping_from([198, 51, 100, 5], "203.0.113.3");
    assert_eq!(send(&app, other_peer).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_per_ip_limit_uses_proxy_header_when_trusted() {
    let config = Config {
        trust_proxy_headers: true,
        ..config(1)
    };
    let app = app_with(config, Arc::new(ManualClock::at(1_000_000)));
    let proxy = [10, 0, 0, 2];

    assert_eq!(send(&app, ping_from(proxy, "203.0.113.9")).await.0, StatusCode::OK);
    assert_eq!(
        send(&app, ping_from(proxy, "203.0.113.9")).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&app, ping_from(proxy, "203.0.113.10")).await.0, StatusCode::OK);
}
