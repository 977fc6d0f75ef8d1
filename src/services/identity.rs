//! Bearer tokens asserting a user identity.
//!
//! A token is `base64url(claims) "." base64url(hmac_sha256(claims))`, claims
//! being the JSON object `{sub, name, exp}` (expiry in seconds since the epoch).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{dao::path::is_valid_segment, error::ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the signing secret.
pub const TOKEN_SECRET_ENV: &str = "LIVE_ARENA_TOKEN_SECRET";

/// Verified identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    /// Trusted display name carried by the token.
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("user id must be 1-64 characters of [A-Za-z0-9_-]")]
    InvalidUserId,
    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// Signs and verifies identity tokens with a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::EmptySecret)
    }

    /// Issue a token valid for `ttl_secs` seconds.
    pub fn mint(&self, user_id: &str, display_name: &str, ttl_secs: i64) -> Result<String, TokenError> {
        if !is_valid_segment(user_id) {
            return Err(TokenError::InvalidUserId);
        }
        let claims = Claims {
            sub: user_id.to_string(),
            name: display_name.to_string(),
            exp: OffsetDateTime::now_utc().unix_timestamp() + ttl_secs,
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Check the signature and expiry, returning the asserted principal.
    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(TokenError::Expired);
        }
        if !is_valid_segment(&claims.sub) {
            return Err(TokenError::InvalidUserId);
        }

        Ok(Principal {
            user_id: claims.sub,
            display_name: claims.name,
        })
    }
}

/// Host-only commands are reserved to the principal that created the session.
pub fn ensure_host(host_id: &str, principal: &Principal, action: &str) -> Result<(), ServiceError> {
    if host_id == principal.user_id {
        Ok(())
    } else {
        Err(ServiceError::NotHost(format!(
            "only the session host may {action}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new("test-secret").unwrap()
    }

    #[test]
    fn minted_tokens_verify() {
        let token = verifier().mint("alice", "Alice", 60).unwrap();
        let principal = verifier().verify(&token).unwrap();
        assert_eq!(principal.user_id, "alice");
        assert_eq!(principal.display_name, "Alice");
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = TokenVerifier::new("other").unwrap().mint("alice", "Alice", 60).unwrap();
        assert_eq!(verifier().verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let token = verifier().mint("alice", "Alice", 60).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"mallory","name":"Alice","exp":99999999999}"#);
        assert_eq!(
            verifier().verify(&format!("{forged}.{signature}")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn expired_and_garbage_tokens_are_rejected() {
        let token = verifier().mint("alice", "Alice", -1).unwrap();
        assert_eq!(verifier().verify(&token), Err(TokenError::Expired));
        assert_eq!(verifier().verify("nope"), Err(TokenError::Malformed));
    }

    #[test]
    fn user_ids_must_be_path_safe() {
        assert_eq!(
            verifier().mint("a/b", "x", 60),
            Err(TokenError::InvalidUserId)
        );
    }
}
