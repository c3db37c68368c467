//! Bearer tokens and password handling.
//!
//! The wire keeps the legacy shape: the client sends the SHA-256 hex of the
//! password, the server re-hashes that digest with Argon2 before storing or
//! comparing, so the database never holds the reversible digest directly.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::Ctx;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

const TOKEN_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub exp: u64,
}

pub fn sign_token(secret: &str, id: i64, username: &str, role: &str) -> Result<String, ApiError> {
    let claims = Claims {
        id,
        username: username.to_string(),
        role: role.to_string(),
        exp: unix_now() + TOKEN_TTL_SECS,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::AuthInvalid)
}

pub fn hash_password_digest(digest_hex: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(digest_hex.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn verify_password_digest(digest_hex: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(digest_hex.as_bytes(), &parsed)
        .is_ok()
}

pub fn sha256_hex(s: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(s.as_bytes()))
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Any authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<Ctx>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = Arc::<Ctx>::from_ref(state);
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::AuthMissing)?;
        let token = value.strip_prefix("Bearer ").ok_or(ApiError::AuthMissing)?;
        let claims = verify_token(&ctx.config.jwt_secret, token)?;
        Ok(AuthUser {
            id: claims.id,
            username: claims.username,
            role: claims.role,
        })
    }
}

/// Authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    Arc<Ctx>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let token = sign_token("secret", 7, "alice", ROLE_USER).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(7, claims.id);
        assert_eq!("alice", claims.username);
        assert_eq!(ROLE_USER, claims.role);
        assert!(claims.exp > unix_now());
    }

    #[test]
    fn test_token_wrong_secret() {
        let token = sign_token("secret", 1, "alice", ROLE_USER).unwrap();
        assert!(verify_token("other", &token).is_err());
    }

    #[test]
    fn test_token_expired() {
        let claims = Claims {
            id: 1,
            username: "alice".to_string(),
            role: ROLE_USER.to_string(),
            exp: unix_now() - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn test_token_garbage() {
        assert!(verify_token("secret", "not.a.token").is_err());
    }

    #[test]
    fn test_password_digest_round_trip() {
        // sha256("admin"), the digest the client would send
        let digest = "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918";
        assert_eq!(digest, sha256_hex("admin"));
        let stored = hash_password_digest(digest).unwrap();
        assert!(verify_password_digest(digest, &stored));
        assert!(!verify_password_digest("beef", &stored));
    }

    #[test]
    fn test_verify_against_garbage_hash() {
        assert!(!verify_password_digest("abc", "not-a-phc-string"));
    }
}
