//! Registration, login and session tokens.
//!
//! Passwords are hashed with bcrypt on a blocking thread. Session tokens are
//! HS256 JWTs carrying the user id; they have no expiry, so logging out only
//! clears the client's copy.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{ParleyError, Result};
use crate::models::User;
use crate::store::CredentialStore;

pub const MIN_USER_NAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

/// A user together with the session token issued for them.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    iat: i64,
}

// ============================================================================
// Validation
// ============================================================================

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Checks the register form field by field and reports the first problem.
pub fn validate_registration(req: &RegisterRequest) -> Result<()> {
    let user_name = req.user_name.trim();
    let email = req.email.trim();

    let problem = if user_name.is_empty() {
        Some("Username is required")
    } else if user_name.chars().count() < MIN_USER_NAME_LEN {
        Some("Username must be at least 3 characters")
    } else if email.is_empty() {
        Some("Email is required")
    } else if !is_valid_email(email) {
        Some("Enter a valid email")
    } else if req.password.is_empty() {
        Some("Password is required")
    } else if req.password.chars().count() < MIN_PASSWORD_LEN {
        Some("Password must be at least 6 characters")
    } else {
        None
    };

    match problem {
        Some(msg) => Err(ParleyError::Validation(msg.to_string())),
        None => Ok(()),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// SessionTokens
// ============================================================================

/// Signs and verifies session tokens with the process-wide secret.
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionTokens {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            iat: Utc::now().timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ParleyError::Internal(format!("Failed to create token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Uuid> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.sub)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                ParleyError::InvalidToken
            })
    }
}

// ============================================================================
// AuthService
// ============================================================================

#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    tokens: SessionTokens,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(credentials: Arc<dyn CredentialStore>, config: &AuthConfig) -> Self {
        Self {
            credentials,
            tokens: SessionTokens::new(&config.jwt_secret),
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<Session> {
        validate_registration(&req)?;
        let user_name = req.user_name.trim().to_string();
        let email = req.email.trim().to_string();

        if self
            .credentials
            .find_user_by_identity(Some(user_name.as_str()), Some(email.as_str()))
            .await?
            .is_some()
        {
            tracing::warn!(user_name = %user_name, "Registration rejected: credentials taken");
            return Err(ParleyError::Conflict(
                "Username or Email already exists".to_string(),
            ));
        }

        let password = req.password;
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ParleyError::Internal(format!("Password hashing task failed: {e}")))?
            .map_err(|e| ParleyError::Internal(format!("Password hashing error: {e}")))?;

        let user = User {
            id: Uuid::new_v4(),
            user_name,
            email,
            password_hash,
            created_at: Utc::now(),
        };
        self.credentials.insert_user(&user).await?;

        let token = self.tokens.issue(user.id)?;
        tracing::info!(user_id = %user.id, user_name = %user.user_name, "User registered");

        Ok(Session { user, token })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Session> {
        let user_name = non_blank(&req.user_name);
        let email = non_blank(&req.email);

        if user_name.is_none() && email.is_none() {
            return Err(ParleyError::Validation(
                "Username or Email is required".to_string(),
            ));
        }
        if req.password.is_empty() {
            return Err(ParleyError::Validation("Password is required".to_string()));
        }

        let user = self
            .credentials
            .find_user_by_identity(user_name, email)
            .await?
            .ok_or_else(|| ParleyError::NotFound("User doesn't exist".to_string()))?;

        let password = req.password.clone();
        let password_hash = user.password_hash.clone();
        let is_valid =
            tokio::task::spawn_blocking(move || bcrypt::verify(&password, &password_hash))
                .await
                .map_err(|e| {
                    ParleyError::Internal(format!("Password verification task failed: {e}"))
                })?
                .map_err(|e| ParleyError::Internal(format!("Password verification error: {e}")))?;

        if !is_valid {
            tracing::warn!(user_id = %user.id, "Login rejected: wrong password");
            return Err(ParleyError::Auth("Password is incorrect".to_string()));
        }

        let token = self.tokens.issue(user.id)?;
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(Session { user, token })
    }

    /// Resolve a session token to a still-existing user.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let user_id = self.tokens.verify(token)?;
        self.credentials
            .find_user_by_id(user_id)
            .await?
            .ok_or(ParleyError::InvalidToken)
    }
}

// ============================================================================
// TESTS
// ============================================================================
