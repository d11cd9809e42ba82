use std::fmt;

use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::principal::Identity;

pub const SESSION_TTL_HOURS: i64 = 12;
pub const MIN_KEY_LEN: usize = 32;
pub const DEFAULT_ISSUER: &str = "tablegate";

/// Symmetric key used to sign session tokens. Never printed.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TokenError> {
        if bytes.len() < MIN_KEY_LEN {
            return Err(TokenError::WeakKey(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Decode a standard or URL-safe base64 key.
    pub fn from_base64(text: &str) -> Result<Self, TokenError> {
        let text = text.trim();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(text))
            .map_err(|_| TokenError::KeyEncoding)?;
        Self::from_bytes(bytes)
    }

    /// Fresh random key; sessions signed with it do not survive a restart.
    pub fn generate() -> Result<Self, TokenError> {
        let mut buf = vec![0u8; MIN_KEY_LEN * 2];
        getrandom::getrandom(&mut buf).map_err(|_| TokenError::KeyEncoding)?;
        Ok(Self(buf))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signature mismatch, wrong issuer, or a token that does not parse at all.
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("signing key must be at least {MIN_KEY_LEN} bytes, got {0}")]
    WeakKey(usize),
    #[error("signing key is not valid base64")]
    KeyEncoding,
    #[error("token encoding failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    iss: String,
    identity_id: i64,
    login: String,
    role: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies HS256 session tokens carrying an [`Identity`].
pub struct SessionCodec {
    issuer: String,
    ttl_secs: i64,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionCodec {
    pub fn new(key: &SigningKey, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against our own clock in verify_at
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        Self {
            issuer,
            ttl_secs: SESSION_TTL_HOURS * 3600,
            encoding: EncodingKey::from_secret(&key.0),
            decoding: DecodingKey::from_secret(&key.0),
            validation,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, Utc::now().timestamp())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, identity: &Identity, now: i64) -> Result<String, TokenError> {
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            identity_id: identity.identity_id,
            login: identity.login.clone(),
            role: identity.role.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Encode)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify the signature first, then expiry against `now`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, TokenError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(target: "tablegate::session", "token rejected: {:?}", e.kind());
            TokenError::BadSignature
        })?;
        let claims = data.claims;
        if now > claims.exp {
            debug!(target: "tablegate::session", login = %claims.login, "token expired");
            return Err(TokenError::Expired);
        }
        Ok(Identity { identity_id: claims.identity_id, login: claims.login, role: claims.role })
    }
}
