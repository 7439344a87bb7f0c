//! Email/password identity provider and the device session.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::db::Repository;
use crate::errors::AppError;

/// Shortest password the provider accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

/// The signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

/// Identity provider holding the single session of this device.
pub struct AuthService {
    repo: Arc<Repository>,
    current: RwLock<Option<AuthUser>>,
}

impl AuthService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            current: RwLock::new(None),
        }
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.current.read().await.clone()
    }

    /// The signed-in user, or `Unauthorized` naming what the caller tried to do.
    pub async fn require_user(&self, action: &str) -> Result<AuthUser, AppError> {
        self.current_user().await.ok_or_else(|| {
            AppError::Unauthorized(format!(
                "User not authenticated. Please log in to {}.",
                action
            ))
        })
    }

    /// Register a new account and sign it in.
    pub async fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AppError> {
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        let account = self.repo.create_account(email, &password_hash).await?;
        let user = AuthUser {
            uid: account.uid,
            email: account.email,
        };

        tracing::info!(uid = %user.uid, "Account created");
        *self.current.write().await = Some(user.clone());
        Ok(user)
    }

    /// Verify credentials and start a session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AppError> {
        let invalid = || AppError::Authentication("Invalid email or password".to_string());

        let account = self
            .repo
            .find_account_by_email(email)
            .await?
            .ok_or_else(invalid)?;

        let parsed = PasswordHash::new(&account.password_hash)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| invalid())?;

        let user = AuthUser {
            uid: account.uid,
            email: account.email,
        };
        tracing::info!(uid = %user.uid, "Signed in");
        *self.current.write().await = Some(user.clone());
        Ok(user)
    }

    pub async fn sign_out(&self) {
        if let Some(user) = self.current.write().await.take() {
            tracing::info!(uid = %user.uid, "Signed out");
        }
    }
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::Validation(format!(
            "Invalid email address: {}",
            email
        ))),
    }
}
