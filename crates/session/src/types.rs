//! Session state, profile and event types shared by every consumer

use crate::token::{AccessClaims, TokenPair, one_or_many};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Notice shown once when a session ends because it could not be renewed
pub const SESSION_EXPIRED_NOTICE: &str = "Your session expired. Please login again.";

/// Profile of the signed-in user as returned by `GET /auth/profile`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "role", deserialize_with = "one_or_many")]
    pub roles: Vec<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

impl UserProfile {
    /// Minimal profile derived from access-token claims
    pub fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            id: claims.subject.clone(),
            full_name: claims.name.clone(),
            email: claims.email.clone(),
            roles: claims.roles.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Name to greet the user with
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("customer")
    }
}

/// Coarse session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Startup has not resolved yet; route decisions must wait
    Initializing,
    Authenticated,
    Anonymous,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Snapshot of the session published to consumers.
///
/// `status` is `Authenticated` exactly when both `access_token` and `user`
/// are present; the constructors are the only way to build one.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionState {
    status: SessionStatus,
    user: Option<UserProfile>,
    roles: BTreeSet<String>,
    access_token: Option<String>,
    expires_at: Option<i64>,
}

impl SessionState {
    pub const fn initializing() -> Self {
        Self {
            status: SessionStatus::Initializing,
            user: None,
            roles: BTreeSet::new(),
            access_token: None,
            expires_at: None,
        }
    }

    pub const fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            user: None,
            roles: BTreeSet::new(),
            access_token: None,
            expires_at: None,
        }
    }

    pub(crate) fn authenticated(
        user: UserProfile,
        roles: BTreeSet<String>,
        tokens: &TokenPair,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
            roles,
            access_token: Some(tokens.access_token.clone()),
            expires_at,
        }
    }

    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    pub const fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub const fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Access-token expiry in epoch seconds, when the token carries one
    pub const fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.roles.contains(crate::token::ADMIN_ROLE)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("status", &self.status)
            .field("user", &self.user.as_ref().and_then(|u| u.email.as_deref()))
            .field("roles", &self.roles)
            .field("has_token", &self.access_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogoutReason {
    UserInitiated,
    /// Refresh failed or timed out
    SessionExpired,
    /// Access token could not be decoded
    CorruptToken,
    /// Idle prompt went unanswered
    Idle,
}

impl LogoutReason {
    /// User-visible notice for this reason, if one should be shown
    pub const fn notice(self) -> Option<&'static str> {
        match self {
            Self::SessionExpired | Self::CorruptToken => Some(SESSION_EXPIRED_NOTICE),
            Self::UserInitiated | Self::Idle => None,
        }
    }
}

/// Discrete session transitions, broadcast to every subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user: UserProfile },
    Refreshed { expires_at: Option<i64> },
    LoggedOut { reason: LogoutReason, redirect: bool },
}

/// Body of `POST /auth/login`
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

static EMAIL_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+"));

/// Minimum accepted password length at registration
pub const MIN_PASSWORD_LEN: usize = 6;

/// A form field that failed client-side validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Body of `POST /auth/register`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
}

impl RegisterRequest {
    /// Check the form before it is sent. Every failing field is reported.
    ///
    /// # Errors
    ///
    /// The failing fields, in form order.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut fail = |field, message| errors.push(FieldError { field, message });

        if blank(&self.full_name) {
            fail("fullName", "Full name is required");
        }
        if blank(&self.email) {
            fail("email", "Email is required");
        } else if !EMAIL_PATTERN
            .as_ref()
            .is_ok_and(|pattern| pattern.is_match(&self.email))
        {
            fail("email", "Enter a valid email");
        }
        if blank(&self.password) {
            fail("password", "Password is required");
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            fail("password", "Password must be at least 6 characters");
        }
        let required = [
            ("addressLine1", &self.address_line1, "Address Line 1 is required"),
            ("city", &self.city, "City is required"),
            ("state", &self.state, "State is required"),
            ("country", &self.country, "Country is required"),
            ("zipCode", &self.zip_code, "Zip Code is required"),
        ];
        for (field, value, message) in required {
            if blank(value) {
                fail(field, message);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("city", &self.city)
            .field("country", &self.country)
            .finish_non_exhaustive()
    }
}

/// What `login` accepts: credentials to exchange, or an already issued pair
#[derive(Debug, Clone)]
pub enum Credentials {
    Password(LoginRequest),
    Tokens(TokenPair),
}

impl From<LoginRequest> for Credentials {
    fn from(request: LoginRequest) -> Self {
        Self::Password(request)
    }
}

impl From<TokenPair> for Credentials {
    fn from(pair: TokenPair) -> Self {
        Self::Tokens(pair)
    }
}
