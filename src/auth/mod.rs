//! API token issuance and verification
//!
//! Tokens are HS256 JWTs whose claims carry the granted permissions. The
//! manager owns the secret: it verifies locally, and providers delegate
//! verification to the manager through [`TokenVerifier`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::api::{Grants, Permission};
use crate::error::{Error, Result};

/// Claims carried by an API token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub allow: Vec<Permission>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Issues and verifies API tokens with a shared secret
pub struct JwtAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthority {
    /// Create a new authority from a secret
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token granting `perms`
    pub fn issue(&self, perms: &[Permission]) -> Result<String> {
        let claims = Claims {
            allow: perms.to_vec(),
            iat: Some(Utc::now().timestamp()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Unauthorized(format!("failed to sign token: {}", e)))
    }

    /// Decode a token and return its permissions
    pub fn decode(&self, token: &str) -> Result<Vec<Permission>> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| Error::Unauthorized(format!("invalid token: {}", e)))?;
        Ok(data.claims.allow)
    }
}

/// Resolves a bearer token into the permissions it grants
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>>;
}

#[async_trait]
impl TokenVerifier for JwtAuthority {
    async fn verify(&self, token: &str) -> Result<Vec<Permission>> {
        self.decode(token)
    }
}

/// Shared verifier handed to the HTTP middleware
pub type SharedVerifier = Arc<dyn TokenVerifier>;

/// Body of `POST /v0/auth/verify`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

/// Response of `POST /v0/auth/verify`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub allow: Vec<Permission>,
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that verifies the bearer token and attaches [`Grants`] to the request
pub async fn require_bearer(
    State(verifier): State<SharedVerifier>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        debug!("Missing or invalid Authorization header");
        return Error::Unauthorized("missing bearer token".to_string()).into_response();
    };

    match verifier.verify(&token).await {
        Ok(perms) => {
            req.extensions_mut().insert(Grants::new(perms));
            next.run(req).await
        }
        Err(e) => {
            debug!("Token verification failed: {}", e);
            match e {
                Error::Unauthorized(_) => e.into_response(),
                other => Error::Unauthorized(other.message()).into_response(),
            }
        }
    }
}

/// Load the signing secret from `path`, generating and persisting one if absent
pub fn load_or_create_secret(path: &Path) -> std::io::Result<String> {
    if path.exists() {
        let secret = std::fs::read_to_string(path)?;
        return Ok(secret.trim().to_string());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    std::fs::write(path, &secret)?;
    Ok(secret)
}
