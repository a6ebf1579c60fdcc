use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AuthError, ConfigError};

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on a session lifetime.
pub const MAX_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies stateless session tokens of the form
/// `base64url(claims) "." base64url(hmac_sha256(claims))`.
#[derive(Clone)]
pub struct SessionIssuer {
    keyed: HmacSha256,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, ConfigError> {
        if ttl <= Duration::zero() || ttl > Duration::days(MAX_TTL_DAYS) {
            return Err(ConfigError::Invalid {
                key: "token_ttl_secs",
                reason: format!("must be between 1 second and {MAX_TTL_DAYS} days"),
            });
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|e| ConfigError::Invalid {
            key: "token_secret",
            reason: e.to_string(),
        })?;
        Ok(Self { keyed, ttl })
    }

    pub fn issue(&self, username: &str) -> Result<String, serde_json::Error> {
        self.issue_at(username, Utc::now())
    }

    pub fn issue_at(&self, username: &str, now: DateTime<Utc>) -> Result<String, serde_json::Error> {
        let claims = Claims {
            sub: username.to_string(),
            iat: now.timestamp(),
            // Saturates at the end of the representable range.
            exp: now
                .checked_add_signed(self.ttl)
                .map_or(i64::MAX, |exp| exp.timestamp()),
        };
        let payload = B64URL.encode(serde_json::to_vec(&claims)?);
        let signature = B64URL.encode(self.mac(payload.as_bytes()).finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::Malformed)?;
        if payload.is_empty() || signature.contains('.') {
            return Err(AuthError::Malformed);
        }
        let signature = B64URL.decode(signature).map_err(|_| AuthError::Malformed)?;
        self.mac(payload.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| AuthError::SignatureInvalid)?;

        let claims: Claims = B64URL
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(AuthError::Malformed)?;
        if claims.sub.is_empty() {
            return Err(AuthError::Malformed);
        }
        if now.timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(data);
        mac
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
