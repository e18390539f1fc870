//! Signed access tokens (EdDSA JWT).
//!
//! The key pair is loaded once at startup and never mutated. Timestamps are
//! taken from the injected clock rather than from the library's own clock, so
//! expiry can be exercised deterministically.

use jwt_simple::prelude::*;
use jwt_simple::JWTError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Verified contents of an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub scope: Vec<String>,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Token is malformed")]
    Malformed,
    #[error("Token signature is invalid")]
    SignatureInvalid,
}

impl TokenError {
    fn classify(err: &jwt_simple::Error) -> Self {
        match err.downcast_ref::<JWTError>() {
            Some(JWTError::TokenHasExpired) => TokenError::Expired,
            Some(JWTError::InvalidSignature) => TokenError::SignatureInvalid,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Clone)]
pub struct JwtKeys {
    key_pair: Arc<Ed25519KeyPair>,
    public_key: Arc<Ed25519PublicKey>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_secs: u64,
}

impl JwtKeys {
    pub fn from_key_pair(key_pair: Ed25519KeyPair) -> Self {
        let public_key = key_pair.public_key();
        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            issuer: None,
            audience: None,
            leeway_secs: 0,
        }
    }

    /// Decodes a base64-encoded Ed25519 private key.
    pub fn from_base64(private_key_b64: &str) -> Result<Self, KeyError> {
        use base64::Engine;

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(private_key_b64.trim())
            .map_err(|_| KeyError::Encoding)?;

        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(Self::from_key_pair(key_pair))
    }

    pub fn ephemeral() -> Self {
        Self::from_key_pair(Ed25519KeyPair::generate())
    }

    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Returns `(private_key_b64, public_key_b64)`.
    pub fn generate_key_pair() -> (String, String) {
        use base64::Engine;

        let key_pair = Ed25519KeyPair::generate();
        let private_b64 = base64::engine::general_purpose::STANDARD.encode(key_pair.to_bytes());
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key_pair.public_key().to_bytes());
        (private_b64, public_b64)
    }

    pub fn sign(
        &self,
        user_id: Uuid,
        custom: AccessClaims,
        issued_at: i64,
        ttl_secs: i64,
    ) -> Result<(String, Claims), jwt_simple::Error> {
        let jti = Uuid::new_v4().to_string();
        let iat = issued_at.max(0) as u64;
        let ttl = ttl_secs.max(0) as u64;

        let mut claims = jwt_simple::claims::Claims::with_custom_claims(
            custom.clone(),
            Duration::from_secs(ttl),
        )
        .with_subject(user_id.to_string())
        .with_jwt_id(jti.clone());

        claims.issued_at = Some(Duration::from_secs(iat));
        claims.invalid_before = Some(Duration::from_secs(iat));
        claims.expires_at = Some(Duration::from_secs(iat + ttl));

        if let Some(issuer) = &self.issuer {
            claims = claims.with_issuer(issuer);
        }
        if let Some(audience) = &self.audience {
            claims = claims.with_audience(audience);
        }

        let token = self.key_pair.sign(claims)?;

        Ok((
            token,
            Claims {
                sub: user_id.to_string(),
                email: custom.email,
                scope: custom.scope,
                jti,
                exp: (iat + ttl) as i64,
                iat: iat as i64,
            },
        ))
    }

    /// Verifies signature, issuer/audience and expiry as of `now` (unix seconds).
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut options = VerificationOptions {
            time_tolerance: Some(Duration::from_secs(self.leeway_secs)),
            artificial_time: Some(Duration::from_secs(now.max(0) as u64)),
            ..Default::default()
        };
        if let Some(issuer) = &self.issuer {
            options.allowed_issuers = Some(HashSet::from([issuer.clone()]));
        }
        if let Some(audience) = &self.audience {
            options.allowed_audiences = Some(HashSet::from([audience.clone()]));
        }

        let token_data = self
            .public_key
            .verify_token::<AccessClaims>(token, Some(options))
            .map_err(|e| TokenError::classify(&e))?;

        let sub = token_data.subject.ok_or(TokenError::Malformed)?;
        let exp = token_data.expires_at.ok_or(TokenError::Malformed)?;

        Ok(Claims {
            sub,
            email: token_data.custom.email,
            scope: token_data.custom.scope,
            jti: token_data.jwt_id.unwrap_or_default(),
            exp: exp.as_secs() as i64,
            iat: token_data
                .issued_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("JWT private key must be valid base64")]
    Encoding,
    #[error("JWT private key must be a valid Ed25519 key")]
    InvalidKey,
}
