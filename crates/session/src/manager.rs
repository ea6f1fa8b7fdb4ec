//! Session manager
//!
//! The single writer of the token pair. Every other component reads the
//! published [`SessionState`] or goes through [`SessionManager::refresh`].
//!
//! Writes are ordered by an epoch counter: login, restore and logout start a
//! new epoch, and a refresh only commits if the epoch it started in is still
//! current. A refresh that loses that race never re-authenticates a session
//! the user already ended.

use crate::client::IdentityApi;
use crate::error::SessionError;
use crate::scheduler::{Clock, RefreshScheduler, SystemClock};
use crate::store::TokenStore;
use crate::token::{AccessClaims, TokenPair, fingerprint};
use crate::types::{
    Credentials, LogoutReason, SessionEvent, SessionState, SessionStatus, UserProfile,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use storefront_core::SessionConfig;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<(), SessionError>>>;

const EVENT_CAPACITY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tunables for a [`SessionManager`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long before expiry the silent refresh fires
    pub refresh_margin: Duration,
    /// Bound on each identity-service call
    pub request_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            clock: Arc::new(SystemClock),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            refresh_margin: config.refresh_margin(),
            request_timeout: config.request_timeout(),
            ..Self::default()
        }
    }
}

/// How a token pair came to be committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commit {
    Login,
    Restore,
    Refresh,
}

struct Inner {
    identity: Arc<dyn IdentityApi>,
    store: Arc<dyn TokenStore>,
    scheduler: RefreshScheduler,
    request_timeout: Duration,
    /// In-memory copy of the persisted pair; guards every write
    tokens: Mutex<Option<TokenPair>>,
    epoch: AtomicU64,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

/// Owns the token pair and the authenticated-user projection.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityApi>,
        store: Arc<dyn TokenStore>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::initializing());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                scheduler: RefreshScheduler::new(options.refresh_margin, options.clock),
                request_timeout: options.request_timeout,
                tokens: Mutex::new(None),
                epoch: AtomicU64::new(0),
                state,
                events,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Latest state snapshot
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status()
    }

    pub fn get_user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.inner.state.borrow().access_token().map(str::to_string)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.inner.state.borrow().is_admin()
    }

    /// Watch state snapshots; one new value per transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Receive discrete session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.inner.scheduler
    }

    /// Resolve the startup state from the token store.
    ///
    /// Safe to call more than once; each call performs one profile fetch and
    /// converges to the same state for the same stored tokens.
    pub async fn initialize(&self) -> SessionStatus {
        let stored = self.inner.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable token store");
            None
        });

        let Some(pair) = stored else {
            self.publish_anonymous();
            info!("No stored session");
            return SessionStatus::Anonymous;
        };

        let epoch = {
            let mut tokens = lock(&self.inner.tokens);
            *tokens = Some(pair.clone());
            self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        let claims = match AccessClaims::decode(&pair.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Stored access token is corrupt");
                self.logout_with(LogoutReason::CorruptToken, true).await;
                return self.status();
            }
        };

        match self.fetch_profile(&pair.access_token).await {
            Err(SessionError::Unauthorized(_)) => {
                debug!("Stored access token rejected, refreshing");
                if let Err(e) = self.refresh().await {
                    debug!(error = %e, "Startup refresh failed");
                }
            }
            result => {
                let user = result.unwrap_or_else(|e| {
                    warn!(error = %e, "Profile fetch failed, using token claims");
                    UserProfile::from_claims(&claims)
                });
                if let Err(e) = self.commit(pair, &claims, user, Some(epoch), Commit::Restore) {
                    warn!(error = %e, "Could not restore session");
                    self.logout_with(LogoutReason::SessionExpired, false).await;
                }
            }
        }

        self.status()
    }

    /// Sign in with credentials or an already issued token pair.
    ///
    /// On failure the session is left as it was and the error is returned.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` or `LoginTimeout` from the identity service,
    /// `UndecodableToken` for a malformed access token, `Unauthorized` if the
    /// profile endpoint rejects the new token, `Storage` if it cannot be
    /// persisted.
    pub async fn login(&self, credentials: impl Into<Credentials>) -> Result<(), SessionError> {
        let pair = match credentials.into() {
            Credentials::Password(request) => {
                debug!(email = %request.email, "Logging in");
                tokio::time::timeout(
                    self.inner.request_timeout,
                    self.inner.identity.login(&request),
                )
                .await
                .map_err(|_| SessionError::LoginTimeout)??
            }
            Credentials::Tokens(pair) => pair,
        };

        let claims = AccessClaims::decode(&pair.access_token)?;
        let user = user_or_claims(self.fetch_profile(&pair.access_token).await, &claims)?;
        self.commit(pair, &claims, user, None, Commit::Login)
    }

    /// End the session on the user's request
    pub async fn logout(&self, redirect: bool) {
        self.logout_with(LogoutReason::UserInitiated, redirect).await;
    }

    /// End the session.
    ///
    /// Local teardown always completes; notifying the identity service is
    /// best effort and its failure is only logged.
    pub async fn logout_with(&self, reason: LogoutReason, redirect: bool) {
        if let Some(Some(pair)) = self.teardown(reason, redirect, None) {
            self.notify_logout(&pair).await;
        }
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent callers share one network call and all receive its
    /// outcome. Any failure ends the session before the error is returned.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session, `SessionEnded` if the session
    /// was ended while the refresh was in flight, otherwise the refresh
    /// failure itself.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let shared = {
            let mut slot = lock(&self.inner.in_flight);
            if let Some(existing) = slot.as_ref() {
                debug!("Joining in-flight refresh");
                existing.clone()
            } else {
                let fut = self.clone().run_refresh().boxed().shared();
                *slot = Some(fut.clone());
                fut
            }
        };
        shared.await
    }

    async fn run_refresh(self) -> Result<(), SessionError> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let result = self.refresh_once(epoch).await;

        let reason = match &result {
            Ok(()) | Err(SessionError::SessionEnded) => None,
            Err(SessionError::NotAuthenticated) => self
                .is_authenticated()
                .then_some(LogoutReason::SessionExpired),
            Err(e @ SessionError::UndecodableToken(_)) => {
                warn!(error = %e, "Refreshed access token is corrupt");
                Some(LogoutReason::CorruptToken)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Some(LogoutReason::SessionExpired)
            }
        };
        let revoked = reason.and_then(|reason| self.end_after_failure(reason, epoch));

        // Released only once a rejected pair is gone, so no caller can start
        // a second refresh with it.
        *lock(&self.inner.in_flight) = None;

        if let Some(pair) = revoked {
            self.notify_logout(&pair).await;
        }
        result
    }

    async fn refresh_once(&self, epoch: u64) -> Result<(), SessionError> {
        let refresh_token = lock(&self.inner.tokens)
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
            .ok_or(SessionError::NotAuthenticated)?;

        let pair = tokio::time::timeout(
            self.inner.request_timeout,
            self.inner.identity.refresh(&refresh_token),
        )
        .await
        .map_err(|_| SessionError::RefreshTimeout)??;

        let claims = AccessClaims::decode(&pair.access_token)?;
        let user = match self.fetch_profile(&pair.access_token).await {
            Ok(user) => user,
            Err(e @ SessionError::Unauthorized(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Profile fetch failed after refresh, keeping current user");
                self.get_user()
                    .unwrap_or_else(|| UserProfile::from_claims(&claims))
            }
        };

        self.commit(pair, &claims, user, Some(epoch), Commit::Refresh)
    }

    /// Tear down after a failed refresh, unless a newer session has started.
    /// Returns the pair to revoke.
    fn end_after_failure(&self, reason: LogoutReason, epoch: u64) -> Option<TokenPair> {
        self.teardown(reason, true, Some(epoch)).flatten()
    }

    async fn notify_logout(&self, pair: &TokenPair) {
        match tokio::time::timeout(
            self.inner.request_timeout,
            self.inner.identity.logout(&pair.refresh_token),
        )
        .await
        {
            Ok(Ok(())) => debug!("Refresh token revoked"),
            Ok(Err(e)) => warn!(error = %e, "Logout notification failed"),
            Err(_) => warn!("Logout notification timed out"),
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, SessionError> {
        tokio::time::timeout(
            self.inner.request_timeout,
            self.inner.identity.profile(access_token),
        )
        .await
        .unwrap_or_else(|_| Err(SessionError::Network("profile request timed out".into())))
    }

    /// Persist and publish a token pair.
    ///
    /// With `expected_epoch` the commit is skipped if another login, restore
    /// or logout happened since that epoch.
    fn commit(
        &self,
        pair: TokenPair,
        claims: &AccessClaims,
        user: UserProfile,
        expected_epoch: Option<u64>,
        kind: Commit,
    ) -> Result<(), SessionError> {
        let mut tokens = lock(&self.inner.tokens);

        match expected_epoch {
            Some(expected) if self.inner.epoch.load(Ordering::SeqCst) != expected => {
                debug!(?kind, "Discarding stale token pair");
                return if tokens.is_some() {
                    Ok(())
                } else {
                    Err(SessionError::SessionEnded)
                };
            }
            Some(_) => {}
            None => {
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.inner.store.save(&pair)?;

        let roles = roles_for(claims, &user);
        let next = SessionState::authenticated(user.clone(), roles, &pair, claims.expires_at);
        let was_authenticated = self.inner.state.borrow().is_authenticated();
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        self.arm_scheduler(&pair.access_token);
        info!(
            ?kind,
            token = %fingerprint(&pair.access_token),
            expires_at = ?claims.expires_at,
            "Session established"
        );
        *tokens = Some(pair);
        drop(tokens);

        let event = match kind {
            _ if !was_authenticated => Some(SessionEvent::LoggedIn { user }),
            Commit::Login => Some(SessionEvent::LoggedIn { user }),
            Commit::Refresh => Some(SessionEvent::Refreshed {
                expires_at: claims.expires_at,
            }),
            Commit::Restore => None,
        };
        if let Some(event) = event {
            let _ = self.inner.events.send(event);
        }
        Ok(())
    }

    fn arm_scheduler(&self, access_token: &str) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.arm(access_token, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let session = SessionManager { inner };
            if let Err(e) = session.refresh().await {
                debug!(error = %e, "Silent refresh failed");
            }
        });
    }

    /// Clear tokens, timer and state. Returns `None` if skipped because the
    /// epoch moved on, otherwise the pair that was removed.
    fn teardown(
        &self,
        reason: LogoutReason,
        redirect: bool,
        expected_epoch: Option<u64>,
    ) -> Option<Option<TokenPair>> {
        let mut tokens = lock(&self.inner.tokens);
        if expected_epoch.is_some_and(|e| e != self.inner.epoch.load(Ordering::SeqCst)) {
            debug!(?reason, "Session already replaced, skipping teardown");
            return None;
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let removed = tokens.take();
        self.inner.scheduler.cancel();
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear token store");
        }
        let was_active = self.publish_anonymous();
        drop(tokens);

        if removed.is_some() || was_active {
            info!(?reason, redirect, "Session ended");
            let _ = self
                .inner
                .events
                .send(SessionEvent::LoggedOut { reason, redirect });
        }
        Some(removed)
    }

    /// Returns whether the state changed
    fn publish_anonymous(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.status() == SessionStatus::Anonymous {
                false
            } else {
                *state = SessionState::anonymous();
                true
            }
        })
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.inner.state.borrow())
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

/// Use the fetched profile, falling back to token claims unless the token
/// itself was rejected
fn user_or_claims(
    result: Result<UserProfile, SessionError>,
    claims: &AccessClaims,
) -> Result<UserProfile, SessionError> {
    match result {
        Ok(user) => Ok(user),
        Err(e @ SessionError::Unauthorized(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, "Profile fetch failed, using token claims");
            Ok(UserProfile::from_claims(claims))
        }
    }
}

/// Roles come from the token; the profile only fills in when it has none
fn roles_for(claims: &AccessClaims, user: &UserProfile) -> BTreeSet<String> {
    if claims.roles.is_empty() {
        user.roles.iter().cloned().collect()
    } else {
        claims.roles.clone()
    }
}
