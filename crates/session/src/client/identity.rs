//! Identity service endpoints

use super::{ApiClient, ApiError};
use crate::error::SessionError;
use crate::token::TokenPair;
use crate::types::{LoginRequest, RegisterRequest, UserProfile};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::debug;

/// The four identity-service calls the session depends on
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// `POST /auth/login`
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SessionError>;

    /// `POST /auth/refresh-token`; the refresh token is single use
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError>;

    /// `POST /auth/logout`, invalidating the refresh token server side
    async fn logout(&self, refresh_token: &str) -> Result<(), SessionError>;

    /// `GET /auth/profile` with the access token as bearer
    async fn profile(&self, access_token: &str) -> Result<UserProfile, SessionError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenBody<'a> {
    refresh_token: &'a str,
}

/// [`IdentityApi`] over HTTP
#[derive(Clone, Debug)]
pub struct IdentityClient {
    api: ApiClient,
}

impl IdentityClient {
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// `POST /auth/register`. The form is checked locally first and an
    /// invalid one never reaches the service.
    ///
    /// Returns the service's confirmation message.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidRegistration`] for a bad form,
    /// [`SessionError::Rejected`] when the service refuses it (e.g. the
    /// email is taken).
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, SessionError> {
        request
            .validate()
            .map_err(SessionError::InvalidRegistration)?;

        debug!(email = %request.email, "Registering account");
        let req = self.api.request(Method::POST, "/auth/register").json(request);
        self.api.execute_text(req).await.map_err(rejected)
    }

    /// `GET /auth/confirm-email` with the link parameters from the
    /// confirmation mail. Returns the service's message.
    ///
    /// # Errors
    ///
    /// [`SessionError::Rejected`] for an unknown user or a bad token.
    pub async fn confirm_email(&self, user_id: &str, token: &str) -> Result<String, SessionError> {
        let req = self
            .api
            .request(Method::GET, "/auth/confirm-email")
            .query(&[("userId", user_id), ("token", token)]);
        self.api.execute_text(req).await.map_err(rejected)
    }
}

#[async_trait]
impl IdentityApi for IdentityClient {
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SessionError> {
        let req = self.api.request(Method::POST, "/auth/login").json(request);
        self.api.execute(req).await.map_err(|e| match e {
            ApiError::BadRequest(_) | ApiError::Unauthorized(_) => SessionError::InvalidCredentials,
            e if e.is_timeout() => SessionError::LoginTimeout,
            e => unexpected(e),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let req = self
            .api
            .request(Method::POST, "/auth/refresh-token")
            .json(&RefreshTokenBody { refresh_token });
        self.api.execute(req).await.map_err(|e| match e {
            ApiError::BadRequest(_) | ApiError::Unauthorized(_) | ApiError::Forbidden(_) => {
                SessionError::InvalidOrExpiredRefreshToken
            }
            e if e.is_timeout() => SessionError::RefreshTimeout,
            e => unexpected(e),
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), SessionError> {
        let req = self
            .api
            .request(Method::POST, "/auth/logout")
            .json(&RefreshTokenBody { refresh_token });
        self.api.execute_empty(req).await.map_err(unexpected)
    }

    async fn profile(&self, access_token: &str) -> Result<UserProfile, SessionError> {
        let req = self
            .api
            .authorized(Method::GET, "/auth/profile", Some(access_token));
        self.api.execute(req).await.map_err(|e| match e {
            ApiError::Unauthorized(message) => SessionError::Unauthorized(message),
            e => unexpected(e),
        })
    }
}

fn rejected(err: ApiError) -> SessionError {
    match err {
        ApiError::BadRequest(message) | ApiError::NotFound(message) => {
            SessionError::Rejected(message)
        }
        e => unexpected(e),
    }
}

fn unexpected(err: ApiError) -> SessionError {
    match err {
        ApiError::Request(e) if e.status().is_none() => SessionError::Network(e.to_string()),
        e => SessionError::Service {
            status: e.status().unwrap_or_default(),
            message: e.to_string(),
        },
    }
}

// Mock implementation for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        pub IdentityApi {}

        #[async_trait]
        impl IdentityApi for IdentityApi {
            async fn login(&self, request: &LoginRequest) -> Result<TokenPair, SessionError>;
            async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError>;
            async fn logout(&self, refresh_token: &str) -> Result<(), SessionError>;
            async fn profile(&self, access_token: &str) -> Result<UserProfile, SessionError>;
        }
    }
}
