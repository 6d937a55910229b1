#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use identity_service::{
    build_router,
    config::IdentityConfig,
    services::{
        otp::CodeGenerator, InMemoryRepository, InMemoryStore, RecordingNotifier, SharedRepository,
    },
    utils::ManualClock,
    AppState, Collaborators,
};
use serde_json::Value;
use service_core::config::Config;
use service_core::middleware::rate_limit::{GovernorRateLimiter, RateQuota, SharedRateLimiter};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const FIXED_OTP: &str = "4821";

pub struct TestApp {
    pub router: Router,
    pub repo: SharedRepository,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: ManualClock,
}

pub fn test_config(overrides: &[(&str, &str)]) -> IdentityConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("BCRYPT_COST".to_string(), "4".to_string()),
        ("PUBLIC_BASE_URL".to_string(), "https://id.example.com".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    IdentityConfig::from_source(Config::default(), |key| vars.get(key).cloned())
        .expect("test config should load")
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(&[], 1_000)
}

/// Builds the full router on in-memory collaborators with a fixed OTP generator.
pub fn spawn_app_with(overrides: &[(&str, &str)], rate_capacity: u32) -> TestApp {
    let config = Arc::new(test_config(overrides));
    let repo: SharedRepository = Arc::new(InMemoryRepository::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = ManualClock::default();

    let quota = RateQuota::new(rate_capacity, Duration::from_secs(60)).expect("valid quota");
    let rate_limiter: SharedRateLimiter =
        Arc::new(GovernorRateLimiter::new(quota).expect("valid limiter"));

    let state = AppState::new(
        config,
        Collaborators {
            repo: repo.clone(),
            store: Arc::new(InMemoryStore::new()),
            notifier: notifier.clone(),
            rate_limiter,
            clock: Arc::new(clock.clone()),
            code_generator: Some(Arc::new(|| FIXED_OTP.to_string()) as CodeGenerator),
        },
    )
    .expect("state should build");

    TestApp {
        router: build_router(state),
        repo,
        notifier,
        clock,
    }
}

pub struct TestRequest {
    method: Method,
    uri: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    peer: SocketAddr,
}

impl TestRequest {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            body: None,
            headers: Vec::new(),
            peer: SocketAddr::from(([10, 0, 0, 1], 40000)),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn tenant(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {}", token))
    }

    pub fn cookie(self, cookie: &str) -> Self {
        self.header("cookie", cookie)
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = peer;
        self
    }

    pub async fn send(self, app: &TestApp) -> Response<Body> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body = match self.body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let mut request = builder.body(body).expect("request should build");
        request.extensions_mut().insert(ConnectInfo(self.peer));

        app.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// The `name=value` pair of the access cookie set by a sign-in response.
pub fn access_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("access-token="))
        .and_then(|v| v.split(';').next())
        .expect("access cookie should be set")
        .to_string()
}

pub async fn onboard(app: &TestApp, id: &str) -> String {
    let response = TestRequest::post("/api/v1/tenants")
        .json(serde_json::json!({ "id": id, "name": format!("{} Corp", id) }))
        .send(app)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    body["data"]["token"]
        .as_str()
        .expect("token in body")
        .to_string()
}

/// Signs a phone number in by OTP and returns the access cookie and refresh token.
pub async fn sign_in_by_otp(app: &TestApp, tenant_token: &str, phone: &str) -> (String, String) {
    let response = TestRequest::post("/api/v1/users/otp/send")
        .json(serde_json::json!({ "target": phone }))
        .send(app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = TestRequest::post("/api/v1/users/otp/verify")
        .tenant(tenant_token)
        .json(serde_json::json!({ "target": phone, "code": FIXED_OTP }))
        .send(app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = access_cookie(&response);
    let refresh = response
        .headers()
        .get("x-refresh-token")
        .and_then(|v| v.to_str().ok())
        .expect("refresh header")
        .to_string();
    (cookie, refresh)
}
