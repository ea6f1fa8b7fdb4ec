//! Session and token lifecycle management for the storefront client.
//!
//! [`SessionManager`] owns the access/refresh token pair, persists it through a
//! [`TokenStore`], keeps it fresh with a [`RefreshScheduler`] and recovers
//! authorization failures for every call made through the [`RequestPipeline`].

pub mod client;
pub mod error;
pub mod guard;
pub mod idle;
pub mod manager;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    ApiClient, ApiError, IdentityApi, IdentityClient, ProductPage, ProductQuery, ProfileUpdate,
    StorefrontApi,
};
pub use error::{SessionError, StoreError};
pub use guard::{Access, GuardDecision, authorize};
pub use idle::{Activity, IdleMonitor, IdlePhase};
pub use manager::{SessionManager, SessionOptions};
pub use pipeline::{ApiRequest, CallContext, RequestPipeline};
pub use scheduler::{Clock, FixedClock, RefreshScheduler, Schedule, SystemClock};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{AccessClaims, TokenPair};
pub use types::{
    Credentials, FieldError, LoginRequest, LogoutReason, RegisterRequest, SessionEvent,
    SessionState, SessionStatus, UserProfile,
};
