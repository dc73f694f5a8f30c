//! Claim extraction from the federated identity token.
//!
//! The core never verifies the token signature: the token is handed over by the platform
//! sign-in flow right after the provider issued it. Only the `sub` and `email` claims are
//! read.

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};
use serde::Deserialize;

use crate::error::WalletError;

/// The claims the wallet relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Stable subject identifier issued by the identity provider.
    pub subject_id: String,
    /// Email address of the signed-in user.
    pub email: String,
}

#[derive(Deserialize)]
struct RawClaims {
    sub: Option<String>,
    email: Option<String>,
}

impl IdentityClaims {
    /// Decodes the payload segment of a JWT and extracts `sub` and `email`.
    ///
    /// # Errors
    /// Returns `MalformedIdentity` if the token is not a three-segment JWT, the payload is
    /// not base64url JSON, or either claim is absent or empty.
    pub fn from_token(identity_token: &str) -> Result<Self, WalletError> {
        let mut segments = identity_token.trim().split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
            _ => {
                return Err(WalletError::malformed_identity(
                    "expected a JWT with three segments",
                ))
            }
        };

        let payload = payload.trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .or_else(|_| STANDARD_NO_PAD.decode(payload))
            .map_err(|e| WalletError::malformed_identity(format!("payload is not base64: {e}")))?;

        let claims: RawClaims = serde_json::from_slice(&bytes)
            .map_err(|e| WalletError::malformed_identity(format!("payload is not JSON: {e}")))?;

        let subject_id = non_empty(claims.sub)
            .ok_or_else(|| WalletError::malformed_identity("missing sub claim"))?;
        let email = non_empty(claims.email)
            .ok_or_else(|| WalletError::malformed_identity("missing email claim"))?;

        Ok(Self { subject_id, email })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
