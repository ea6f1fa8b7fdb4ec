//! Test helpers: token minting, a fixed clock and a scriptable identity service

use crate::client::IdentityApi;
use crate::error::SessionError;
use crate::scheduler::{Clock, FixedClock};
use crate::token::TokenPair;
use crate::types::{LoginRequest, UserProfile};
use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Wall-clock instant every test session starts at
pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(NOW_MS))
}

/// Sign arbitrary claims as an HS256 JWT
pub fn mint_token_with(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

pub fn mint_token(exp: i64, roles: &[&str]) -> String {
    mint_token_with(json!({
        "sub": "user-1",
        "email": "ada@example.com",
        "exp": exp,
        "role": roles,
    }))
}

pub fn profile() -> UserProfile {
    UserProfile {
        id: Some("user-1".into()),
        full_name: Some("Ada Lovelace".into()),
        email: Some("ada@example.com".into()),
        roles: vec!["Customer".into()],
        city: Some("London".into()),
        ..UserProfile::default()
    }
}

/// In-process identity service that issues a fresh pair on every login or
/// refresh and counts calls
#[derive(Default)]
pub struct FakeIdentity {
    issued: AtomicUsize,
    current: Mutex<Option<TokenPair>>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    refresh_failure: Mutex<Option<SessionError>>,
    logout_fails: AtomicBool,
    held: AtomicBool,
    gate: Notify,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> TokenPair {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let pair = TokenPair::new(
            mint_token_with(json!({
                "sub": "user-1",
                "exp": NOW_MS / 1000 + 600,
                "jti": n,
            })),
            format!("refresh-{n}"),
        );
        *self.current.lock().unwrap() = Some(pair.clone());
        pair
    }

    /// Pair most recently issued by login or refresh
    pub fn current_pair(&self) -> TokenPair {
        self.current.lock().unwrap().clone().unwrap()
    }

    /// Make refresh calls wait until [`Self::release_refresh`]
    pub fn hold_refresh(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn fail_refresh(&self, error: SessionError) {
        *self.refresh_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityApi for FakeIdentity {
    async fn login(&self, _request: &LoginRequest) -> Result<TokenPair, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.issue())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, SessionError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        loop {
            let notified = self.gate.notified();
            if !self.held.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        if let Some(error) = self.refresh_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.issue())
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), SessionError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(SessionError::Network("connection refused".into()));
        }
        Ok(())
    }

    async fn profile(&self, _access_token: &str) -> Result<UserProfile, SessionError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(profile())
    }
}
