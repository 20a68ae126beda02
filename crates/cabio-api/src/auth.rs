//! Bearer token signing and verification.
//!
//! Tokens are `base64url(claims JSON) . base64url(HMAC-SHA256)`, signed
//! with the server's token secret. Access tokens live one hour, refresh
//! tokens seven days.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cabio_core::time::now_millis;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Access token lifetime: one hour.
const ACCESS_TTL_MILLIS: i64 = 60 * 60 * 1000;
/// Refresh token lifetime: seven days.
const REFRESH_TTL_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// What a token authorizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    pub kind: TokenKind,
    /// Expiry, unix millis.
    pub exp: i64,
}

/// Token signer/verifier, cheap to clone.
#[derive(Clone)]
pub struct TokenKeys {
    secret: Arc<Vec<u8>>,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    fn sign_claims(&self, claims: &Claims) -> String {
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
        let mut mac = self.mac();
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}", body, signature)
    }

    /// Issue an access token for a user.
    pub fn sign_access(&self, user_id: &str) -> String {
        self.sign_claims(&Claims {
            sub: user_id.to_string(),
            kind: TokenKind::Access,
            exp: now_millis() + ACCESS_TTL_MILLIS,
        })
    }

    /// Issue a refresh token for a user.
    pub fn sign_refresh(&self, user_id: &str) -> String {
        self.sign_claims(&Claims {
            sub: user_id.to_string(),
            kind: TokenKind::Refresh,
            exp: now_millis() + REFRESH_TTL_MILLIS,
        })
    }

    /// Verify a token's signature and expiry.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let (body, signature) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = self.mac();
        mac.update(body.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
        if claims.exp <= now_millis() {
            return None;
        }
        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_round_trip() {
        let keys = TokenKeys::new("test-secret");
        let token = keys.sign_access("u1");
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn test_refresh_token_kind() {
        let keys = TokenKeys::new("test-secret");
        let claims = keys.verify(&keys.sign_refresh("u1")).unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let keys = TokenKeys::new("test-secret");
        let token = keys.sign_access("u1");
        let mut tampered = token.clone();
        tampered.replace_range(0..1, if token.starts_with('A') { "B" } else { "A" });
        assert!(keys.verify(&tampered).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let keys = TokenKeys::new("test-secret");
        let other = TokenKeys::new("other-secret");
        assert!(other.verify(&keys.sign_access("u1")).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = TokenKeys::new("test-secret");
        let claims = Claims {
            sub: "u1".to_string(),
            kind: TokenKind::Access,
            exp: now_millis() - 1,
        };
        let token = keys.sign_claims(&claims);
        assert!(keys.verify(&token).is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        let keys = TokenKeys::new("test-secret");
        assert!(keys.verify("not-a-token").is_none());
        assert!(keys.verify("a.b").is_none());
        assert!(keys.verify("").is_none());
    }
}
