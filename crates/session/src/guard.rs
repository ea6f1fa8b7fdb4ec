//! Route access decisions

use crate::types::{SessionState, SessionStatus};

/// Path anonymous users are sent to
pub const LOGIN_PATH: &str = "/login";
/// Path non-admins are sent to from admin routes
pub const HOME_PATH: &str = "/";

/// What a route requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Admin,
}

/// Outcome of checking a route against the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Startup has not resolved; render a loading indicator
    Pending,
    Allow,
    RedirectToLogin,
    RedirectHome,
}

impl GuardDecision {
    /// Target path for redirects
    pub const fn redirect_path(self) -> Option<&'static str> {
        match self {
            Self::RedirectToLogin => Some(LOGIN_PATH),
            Self::RedirectHome => Some(HOME_PATH),
            Self::Pending | Self::Allow => None,
        }
    }
}

/// Decide whether a route may render for the current session
pub fn authorize(state: &SessionState, access: Access) -> GuardDecision {
    if access == Access::Public {
        return GuardDecision::Allow;
    }
    if state.status() == SessionStatus::Initializing {
        return GuardDecision::Pending;
    }
    match access {
        Access::Public => GuardDecision::Allow,
        Access::Authenticated if state.is_authenticated() => GuardDecision::Allow,
        Access::Authenticated => GuardDecision::RedirectToLogin,
        Access::Admin if state.is_admin() => GuardDecision::Allow,
        Access::Admin => GuardDecision::RedirectHome,
    }
}
