//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use storefront_session::{
    ApiClient, FixedClock, IdentityClient, MemoryTokenStore, RequestPipeline, SessionManager,
    SessionOptions, StorefrontApi, TokenPair, TokenStore,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Wall-clock instant the fixed test clock starts at
pub const NOW_MS: i64 = 1_700_000_000_000;

pub const fn now_secs() -> i64 {
    NOW_MS / 1000
}

pub fn mint_token(exp: i64, roles: &[&str]) -> String {
    encode(
        &Header::default(),
        &json!({
            "sub": "user-1",
            "email": "ada@example.com",
            "exp": exp,
            "role": roles,
        }),
        &EncodingKey::from_secret(b"integration-secret"),
    )
    .unwrap()
}

/// Token that will not come up for renewal during a test
pub fn long_lived_token(tag: &str) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": "user-1", "exp": now_secs() + 3600, "jti": tag }),
        &EncodingKey::from_secret(b"integration-secret"),
    )
    .unwrap()
}

pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({ "accessToken": access, "refreshToken": refresh })
}

pub fn profile_body() -> Value {
    json!({
        "fullName": "Ada Lovelace",
        "email": "ada@example.com",
        "roles": ["Customer"],
        "addressLine1": "12 St James's Square",
        "city": "London",
        "country": "UK",
        "zipCode": "SW1Y 4JH"
    })
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Session wired to a wiremock identity service and storefront API
pub struct Harness {
    pub server: MockServer,
    pub clock: Arc<FixedClock>,
    pub store: Arc<MemoryTokenStore>,
    pub session: SessionManager,
    pub pipeline: RequestPipeline,
    pub storefront: StorefrontApi,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_store(MemoryTokenStore::new()).await
    }

    pub async fn with_store(store: MemoryTokenStore) -> Self {
        Self::build(store, NOW_MS).await
    }

    pub async fn build(store: MemoryTokenStore, clock_ms: i64) -> Self {
        let server = MockServer::start().await;
        let api = ApiClient::builder()
            .base_url(server.uri())
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let clock = Arc::new(FixedClock::new(clock_ms));
        let store = Arc::new(store);
        let session = SessionManager::new(
            Arc::new(IdentityClient::new(api.clone())),
            store.clone(),
            SessionOptions {
                request_timeout: Duration::from_secs(5),
                clock: clock.clone(),
                ..SessionOptions::default()
            },
        );
        let pipeline = RequestPipeline::new(api, session.clone());
        let storefront = StorefrontApi::new(pipeline.clone());

        Self {
            server,
            clock,
            store,
            session,
            pipeline,
            storefront,
        }
    }

    /// Serve the profile for any bearer token
    pub async fn mount_profile(&self) {
        Mock::given(method("GET"))
            .and(path("/auth/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body()))
            .mount(&self.server)
            .await;
    }

    /// Accept logout notifications
    pub async fn mount_logout(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    /// Sign in with an already issued pair
    pub async fn sign_in(&self, access: &str, refresh: &str) {
        self.session
            .login(TokenPair::new(access, refresh))
            .await
            .unwrap();
    }

    /// Respond to `GET path` with 401 for `stale` and `body` for `fresh`
    pub async fn mount_rotating_endpoint(&self, route: &str, stale: &str, fresh: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", bearer(stale).as_str()))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", bearer(fresh).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub fn stored_pair(&self) -> Option<TokenPair> {
        self.store.load().unwrap()
    }
}
