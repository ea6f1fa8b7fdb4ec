//! HTTP clients for the identity service and the storefront API

pub mod error;
pub mod identity;
pub mod storefront;

pub use error::ApiError;
pub use identity::{IdentityApi, IdentityClient};
pub use storefront::{ProductPage, ProductQuery, ProfileUpdate, StorefrontApi};

use reqwest::{Client, ClientBuilder, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use storefront_core::SessionConfig;

/// Low-level REST client shared by the identity client and the pipeline.
///
/// It carries no credentials: callers attach the bearer token per request
/// so that a rotated token is always picked up.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Build a client from the session configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ApiError> {
        Self::builder()
            .base_url(config.base_url())
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a request builder for `path` relative to the base URL
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// Create a request builder carrying `Authorization: Bearer <token>`
    /// when a token is given
    pub fn authorized(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let request = self.request(method, path);
        match token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Execute a request and decode a JSON body.
    ///
    /// An empty success body decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns the status-mapped [`ApiError`] for non-success responses.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = Self::check(request.send().await?).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            Ok(serde_json::from_slice(b"null")?)
        } else {
            Ok(serde_json::from_slice(&body)?)
        }
    }

    /// Execute a request whose success body is a plain-text message
    ///
    /// # Errors
    ///
    /// Returns the status-mapped [`ApiError`] for non-success responses.
    pub async fn execute_text(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.text().await?)
    }

    /// Execute a request whose response body is irrelevant
    ///
    /// # Errors
    ///
    /// Returns the status-mapped [`ApiError`] for non-success responses.
    pub async fn execute_empty(&self, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ApiError::from_status(status, message))
        }
    }
}

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ApiClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request timeout
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` without a base URL, or the reqwest
    /// error if the client cannot be constructed.
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ApiError::Configuration("base_url is required".into()))?;

        // Paths are appended verbatim, so drop any trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new();
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }
        client_builder = client_builder.user_agent(
            self.user_agent
                .unwrap_or_else(|| concat!("storefront-client/", env!("CARGO_PKG_VERSION")).into()),
        );

        Ok(ApiClient {
            client: client_builder.build()?,
            base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        assert!(matches!(
            ApiClient::builder().build(),
            Err(ApiError::Configuration(_))
        ));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:5000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api");
    }

    #[test]
    fn test_authorized_request_carries_bearer() {
        let client = ApiClient::new("http://localhost:5000/api").unwrap();
        let request = client
            .authorized(reqwest::Method::GET, "/auth/profile", Some("tok"))
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://localhost:5000/api/auth/profile"
        );
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer tok");
    }
}
