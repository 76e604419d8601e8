//! Accounts and bearer-token sessions
//!
//! # Flow
//!
//! - Register: validated request + matching registration token creates an
//!   account whose password is stored as an Argon2id PHC string.
//! - Login: email + password yield an opaque bearer token (32 random bytes,
//!   hex). Only the token's SHA-256 is persisted.
//! - Authenticate: the HTTP middleware hashes the presented token and looks
//!   up an unexpired session.
//!
//! # Pure Functions
//!
//! Hashing and validation helpers have no database or HTTP dependencies;
//! the flows at the bottom of the module add the database.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::{sessions, users, CallerIdentity, User};
use crate::{Error, Result};

/// Minimum full-name length
pub const MIN_FULL_NAME_LEN: usize = 3;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Bearer token size before hex encoding
pub const SESSION_TOKEN_BYTES: usize = 32;

const AUTH_FAILED: &str = "Authentication failed";

// ========================================
// Request / Response Types
// ========================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub register_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: uuid::Uuid,
}

// ========================================
// Password Hashing
// ========================================

/// Hash a password into a PHC string (Argon2id, random salt)
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string.
///
/// An unparseable stored hash counts as a mismatch.
///
/// ```
/// use roster_common::api::auth::{hash_password, verify_password};
///
/// let stored = hash_password("hunter22").unwrap();
/// assert!(verify_password("hunter22", &stored));
/// assert!(!verify_password("hunter23", &stored));
/// ```
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash unparseable: {}", e);
            false
        }
    }
}

// ========================================
// Session Tokens
// ========================================

/// Fresh bearer token, lowercase hex
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of a bearer token, lowercase hex. This is what gets stored.
///
/// ```
/// use roster_common::api::auth::hash_session_token;
///
/// let h = hash_session_token("abc");
/// assert_eq!(h.len(), 64);
/// assert_eq!(h, hash_session_token("abc"));
/// ```
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// ========================================
// Validation
// ========================================

/// Loose structural email check: one `@`, non-empty local part, dotted
/// domain, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
                    .unwrap_or(false)
        }
        None => false,
    }
}

/// Field rules for registration; the token check is separate
pub fn validate_registration(request: &RegisterRequest) -> Result<()> {
    let mut problems = Vec::new();
    if request.full_name.trim().chars().count() < MIN_FULL_NAME_LEN {
        problems.push(format!(
            "fullName must be at least {} characters",
            MIN_FULL_NAME_LEN
        ));
    }
    if !is_valid_email(request.email.trim()) {
        problems.push("email must be a valid email address".to_string());
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if request.register_token.is_empty() {
        problems.push("registerToken is required".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Validation failed: {}",
            problems.join("; ")
        )))
    }
}

// ========================================
// Flows
// ========================================

/// Create an account.
///
/// `expected_token` is the deployment's registration token; `None` means
/// registration is closed.
pub async fn register(
    pool: &SqlitePool,
    request: &RegisterRequest,
    expected_token: Option<&str>,
) -> Result<User> {
    validate_registration(request)?;

    match expected_token {
        Some(expected) if !expected.is_empty() && expected == request.register_token => {}
        _ => return Err(Error::Forbidden("Access denied".to_string())),
    }

    let password_hash = hash_password(&request.password)?;
    let user = users::create_user(
        pool,
        request.full_name.trim(),
        &request.email,
        &password_hash,
    )
    .await?;

    info!("Registered user {}", user.id);
    Ok(user)
}

/// Exchange credentials for a bearer token valid for `ttl`
pub async fn login(pool: &SqlitePool, request: &LoginRequest, ttl: Duration) -> Result<LoginResponse> {
    let user = users::find_user_by_email(pool, &request.email)
        .await?
        .ok_or_else(|| Error::Unauthorized(AUTH_FAILED.to_string()))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(Error::Unauthorized(AUTH_FAILED.to_string()));
    }

    let now = Utc::now();
    let purged = sessions::delete_expired_sessions(pool, now).await?;
    if purged > 0 {
        info!("Purged {} expired sessions", purged);
    }

    let token = generate_session_token();
    let expires_at = now + ttl;
    sessions::create_session(pool, &hash_session_token(&token), user.id, expires_at).await?;

    info!("User {} logged in", user.id);
    Ok(LoginResponse {
        access_token: token,
        expires_at,
        user_id: user.id,
    })
}

/// Resolve a presented bearer token to its caller
pub async fn authenticate(pool: &SqlitePool, token: &str) -> Result<CallerIdentity> {
    sessions::find_caller(pool, &hash_session_token(token), Utc::now())
        .await?
        .ok_or_else(|| Error::Unauthorized("Invalid or expired session".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            full_name: "Ada Director".to_string(),
            email: "ada@school.org".to_string(),
            password: "secret1".to_string(),
            register_token: "letmein".to_string(),
        }
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@sub.school.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@school.org"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("a@b@c.org"));
        assert!(!is_valid_email("a b@c.org"));
    }

    #[test]
    fn test_registration_rules() {
        assert!(validate_registration(&request()).is_ok());

        let mut short_name = request();
        short_name.full_name = "Al".into();
        assert!(matches!(validate_registration(&short_name), Err(Error::InvalidInput(_))));

        let mut short_password = request();
        short_password.password = "12345".into();
        assert!(validate_registration(&short_password).is_err());

        let mut no_token = request();
        no_token.register_token.clear();
        assert!(validate_registration(&no_token).is_err());
    }

    #[test]
    fn test_tokens_are_unique_hex() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), SESSION_TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_ne!(hash_session_token(&a), a);
    }
}
