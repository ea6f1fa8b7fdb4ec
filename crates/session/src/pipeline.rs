//! Outbound request pipeline
//!
//! Every storefront call goes through [`RequestPipeline`]: the bearer token
//! is read right before each send, and a 401 triggers one refresh and one
//! replay of the original request.

use crate::client::{ApiClient, ApiError};
use crate::manager::SessionManager;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use tracing::debug;

/// Description of a call, replayable after a refresh
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set a JSON body
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    fn to_builder(&self, api: &ApiClient, token: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = api.authorized(self.method.clone(), &self.path, token);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        builder
    }
}

/// Per-call state carried through the pipeline.
///
/// Once marked retried a call is never retried again, whatever fails next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    retried: bool,
}

impl CallContext {
    pub const fn new() -> Self {
        Self { retried: false }
    }

    /// Context for a call that must not be replayed after a refresh
    pub const fn without_retry() -> Self {
        Self { retried: true }
    }

    pub const fn is_retried(&self) -> bool {
        self.retried
    }

    const fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// Authorizes outbound calls and recovers from expired access tokens
#[derive(Clone, Debug)]
pub struct RequestPipeline {
    api: ApiClient,
    session: SessionManager,
}

impl RequestPipeline {
    pub const fn new(api: ApiClient, session: SessionManager) -> Self {
        Self { api, session }
    }

    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send a request and decode its JSON response
    ///
    /// # Errors
    ///
    /// The status-mapped [`ApiError`]. An `Unauthorized` that survives the
    /// single refresh-and-replay is returned as is.
    pub async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.send_with(request, CallContext::new()).await
    }

    /// [`Self::send`] with an explicit call context
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn send_with<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        context: CallContext,
    ) -> Result<T, ApiError> {
        let api = &self.api;
        self.with_recovery(request, context, move |token| {
            api.execute(request.to_builder(api, token.as_deref()))
        })
        .await
    }

    /// Send a request whose response body is irrelevant
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn send_unit(&self, request: &ApiRequest) -> Result<(), ApiError> {
        let api = &self.api;
        self.with_recovery(request, CallContext::new(), move |token| {
            api.execute_empty(request.to_builder(api, token.as_deref()))
        })
        .await
    }

    async fn with_recovery<T, F, Fut>(
        &self,
        request: &ApiRequest,
        mut context: CallContext,
        mut dispatch: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        loop {
            let sent = self.session.get_access_token();
            match dispatch(sent.clone()).await {
                Err(err) if err.is_unauthorized() && !context.is_retried() => {
                    context.mark_retried();
                    let current = self.session.get_access_token();
                    if current.is_some() && current != sent {
                        debug!(path = %request.path, "Token rotated while in flight, replaying");
                        continue;
                    }
                    debug!(path = %request.path, "Unauthorized, refreshing before replay");
                    if let Err(refresh_err) = self.session.refresh().await {
                        debug!(path = %request.path, error = %refresh_err, "Refresh failed, not replaying");
                        return Err(err);
                    }
                }
                result => return result,
            }
        }
    }
}
