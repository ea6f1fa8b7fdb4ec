//! Access/refresh token pair and client-side claim decoding
//!
//! The access token is a JWT. Only its payload is read here, without signature
//! verification: the claims drive refresh scheduling and UI role checks, never
//! server-side authorization.

use crate::error::SessionError;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Role that grants access to admin screens
pub const ADMIN_ROLE: &str = "Admin";

/// Base64url engine that accepts payloads with or without padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Access and refresh token as issued by the identity service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(alias = "refresh_token")]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &fingerprint(&self.access_token))
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .finish()
    }
}

/// Short, non-secret identifier for a token, safe to log
pub fn fingerprint(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}

/// A claim that may be a single string or an array of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// Deserialize a string-or-array field into a `Vec<String>`
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?
        .map(OneOrMany::into_vec)
        .unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(
        default,
        alias = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress"
    )]
    email: Option<String>,
    #[serde(
        default,
        alias = "unique_name",
        alias = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name"
    )]
    name: Option<String>,
    #[serde(default)]
    role: Option<OneOrMany>,
    #[serde(default)]
    roles: Option<OneOrMany>,
    #[serde(
        default,
        rename = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role"
    )]
    schema_role: Option<OneOrMany>,
}

/// Claims the client reads from an access token
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessClaims {
    /// Expiry in epoch seconds; `None` makes the token non-renewable
    pub expires_at: Option<i64>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Normalized role set, merged from every role claim shape
    pub roles: BTreeSet<String>,
}

impl AccessClaims {
    /// Decode the payload segment of a JWT
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UndecodableToken`] if the token is not a
    /// three-part JWT or its payload is not base64url-encoded JSON.
    pub fn decode(token: &str) -> Result<Self, SessionError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(header), Some(payload), Some(_)) if !header.is_empty() && !payload.is_empty() => {
                payload
            }
            _ => {
                return Err(SessionError::UndecodableToken(
                    "expected header.payload.signature".into(),
                ));
            }
        };

        let bytes = PAYLOAD_ENGINE
            .decode(payload)
            .map_err(|e| SessionError::UndecodableToken(format!("invalid base64: {e}")))?;
        let raw: RawClaims = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::UndecodableToken(format!("invalid claims: {e}")))?;

        let roles = [raw.role, raw.roles, raw.schema_role]
            .into_iter()
            .flatten()
            .flat_map(OneOrMany::into_vec)
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect();

        Ok(Self {
            expires_at: raw.exp.filter(|exp| exp.is_finite()).map(epoch_seconds),
            subject: raw.sub,
            email: raw.email,
            name: raw.name,
            roles,
        })
    }

    /// Whether the role set grants admin access
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_seconds(exp: f64) -> i64 {
    exp.floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mint_token, mint_token_with};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    #[test]
    fn test_decodes_expiry_and_scalar_role() {
        let token = mint_token_with(json!({ "exp": 1_700_000_000, "role": "Admin" }));
        let claims = AccessClaims::decode(&token).unwrap();

        assert_eq!(claims.expires_at, Some(1_700_000_000));
        assert!(claims.is_admin());
    }

    #[test]
    fn test_decodes_role_array() {
        let token = mint_token_with(json!({ "exp": 10, "roles": ["Customer", "Admin"] }));
        let claims = AccessClaims::decode(&token).unwrap();

        assert_eq!(
            claims.roles.iter().cloned().collect::<Vec<_>>(),
            vec!["Admin".to_string(), "Customer".to_string()]
        );
    }

    #[test]
    fn test_decodes_schema_role_claim() {
        let token = mint_token_with(json!({
            "exp": 10,
            "http://schemas.microsoft.com/ws/2008/06/identity/claims/role": ["Admin"],
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress": "a@b.c"
        }));
        let claims = AccessClaims::decode(&token).unwrap();

        assert!(claims.is_admin());
        assert_eq!(claims.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_missing_exp_is_not_an_error() {
        let token = mint_token_with(json!({ "sub": "user-1" }));
        let claims = AccessClaims::decode(&token).unwrap();

        assert_eq!(claims.expires_at, None);
        assert_eq!(claims.subject.as_deref(), Some("user-1"));
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_fractional_exp_is_floored() {
        let token = mint_token_with(json!({ "exp": 1234.9 }));
        assert_eq!(AccessClaims::decode(&token).unwrap().expires_at, Some(1234));
    }

    #[test]
    fn test_role_is_case_sensitive() {
        let token = mint_token(100, &["admin"]);
        assert!(!AccessClaims::decode(&token).unwrap().is_admin());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            AccessClaims::decode("not-a-jwt"),
            Err(SessionError::UndecodableToken(_))
        ));
        assert!(matches!(
            AccessClaims::decode("a.!!!.c"),
            Err(SessionError::UndecodableToken(_))
        ));

        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            AccessClaims::decode(&format!("a.{not_json}.c")),
            Err(SessionError::UndecodableToken(_))
        ));
    }

    #[test]
    fn test_accepts_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":42}"#);
        let claims = AccessClaims::decode(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.expires_at, Some(42));
    }

    #[test]
    fn test_token_pair_wire_format() {
        let pair: TokenPair =
            serde_json::from_str(r#"{"accessToken":"a","refreshToken":"r"}"#).unwrap();
        assert_eq!(pair, TokenPair::new("a", "r"));

        let debug = format!("{pair:?}");
        assert!(debug.contains("…a"));
        assert!(!debug.contains("accessToken"));
    }
}
