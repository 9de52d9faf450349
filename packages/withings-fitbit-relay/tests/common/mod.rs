#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use withings_fitbit_relay::config::{ClientCredentials, TlsPaths, DEFAULT_ROUTE_PREFIX};
use withings_fitbit_relay::{
    router, AppState, JsonFileStore, Provider, RelayConfig, TokenRecord, TokenStore,
};

pub const WITHINGS_USER: &str = "42";
pub const FITBIT_USER: &str = "FB1";

/// Relay config with every upstream pointed at `upstream`.
pub fn test_config(upstream: &str) -> RelayConfig {
    RelayConfig {
        withings: ClientCredentials {
            client_id: "withings-client".into(),
            client_secret: "withings-secret".into(),
            redirect_uri: "https://relay.example/withings-to-fitbit/auth/withings".into(),
        },
        fitbit: ClientCredentials {
            client_id: "fitbit-client".into(),
            client_secret: "fitbit-secret".into(),
            redirect_uri: "https://relay.example/withings-to-fitbit/auth/fitbit".into(),
        },
        public_base_url: Some("https://relay.example".into()),
        route_prefix: DEFAULT_ROUTE_PREFIX.into(),
        http_port: 0,
        https_port: 0,
        tls: TlsPaths {
            cert: PathBuf::from("cert.pem"),
            key: PathBuf::from("key.pem"),
            chain: None,
        },
        data_file: None,
        log_json: false,
        withings_account_url: upstream.into(),
        withings_api_url: upstream.into(),
        fitbit_www_url: upstream.into(),
        fitbit_api_url: upstream.into(),
    }
}

pub struct TestRelay {
    pub server: MockServer,
    pub store: JsonFileStore,
    pub state: AppState,
    pub app: Router,
}

impl TestRelay {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let store = JsonFileStore::in_memory();
        let state = AppState::new(test_config(&server.uri()), Arc::new(store.clone()));
        let app = router(state.clone());
        Self {
            server,
            store,
            state,
            app,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post(&self, uri: &str, content_type: &str, body: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", content_type)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Store tokens for both accounts and link them.
    pub fn seed_linked_accounts(&self) {
        self.store
            .set_token(Provider::Withings, WITHINGS_USER, record(WITHINGS_USER, "w-access", "w-refresh"))
            .unwrap();
        self.store
            .set_token(Provider::Fitbit, FITBIT_USER, record(FITBIT_USER, "f-access", "f-refresh"))
            .unwrap();
        self.store.set_link(WITHINGS_USER, FITBIT_USER).unwrap();
    }

    /// Number of requests the upstream mock received on `route`.
    pub async fn hits(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }
}

pub fn record(user_id: &str, access: &str, refresh: &str) -> TokenRecord {
    TokenRecord {
        user_id: user_id.into(),
        access_token: access.into(),
        refresh_token: refresh.into(),
        scope: None,
        expires_at: None,
    }
}

pub async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ── Upstream Mocks ────────────────────────────────────────────────────────────

pub async fn mock_withings_token(server: &MockServer, grant: &str, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/v2/oauth2"))
        .and(body_string_contains(format!("grant_type={grant}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "userid": 42,
                "access_token": access,
                "refresh_token": refresh,
                "scope": "user.metrics",
                "expires_in": 10800
            }
        })))
        .mount(server)
        .await;
}

pub async fn mock_fitbit_token(server: &MockServer, grant: &str, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains(format!("grant_type={grant}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "user_id": FITBIT_USER,
            "scope": "weight",
            "expires_in": 28800
        })))
        .mount(server)
        .await;
}

pub async fn mock_subscribe(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {}
        })))
        .mount(server)
        .await;
}

pub async fn mock_measures(server: &MockServer, measures: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/measure"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "body": {
                "updatetime": 1700000100,
                "timezone": "Europe/Paris",
                "measuregrps": [{
                    "grpid": 1001,
                    "attrib": 0,
                    "date": 1700000000,
                    "created": 1700000005,
                    "category": 1,
                    "measures": measures
                }]
            }
        })))
        .mount(server)
        .await;
}

pub async fn mock_body_log(server: &MockServer, kind: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/1/user/-/body/log/{kind}.json")))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
}
