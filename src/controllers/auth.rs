//! Sign-up, sign-in and session state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::{begin, settle, HasStatus, Status};
use crate::auth::{AuthService, AuthUser};
use crate::db::{Collection, Repository};
use crate::errors::AppError;
use crate::models::{Credentials, SignUpRequest, User};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    #[serde(flatten)]
    pub status: Status,
    pub user: Option<AuthUser>,
    /// Set when the last sign-in was rejected.
    pub false_credential: bool,
    pub sign_up_success: bool,
}

impl HasStatus for AuthState {
    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

pub struct AuthController {
    auth: Arc<AuthService>,
    repo: Arc<Repository>,
    state: watch::Sender<AuthState>,
}

impl AuthController {
    pub fn new(auth: Arc<AuthService>, repo: Arc<Repository>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self { auth, repo, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Refresh the published session from the identity provider.
    pub async fn check_session(&self) -> Option<AuthUser> {
        let user = self.auth.current_user().await;
        self.state.send_modify(|s| s.user = user.clone());
        user
    }

    /// Create an account, write its profile document and stay signed in.
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthUser, AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.sign_up_success = false);

        let result = self.create_account(request).await;
        self.state.send_modify(|s| match &result {
            Ok(user) => {
                s.user = Some(user.clone());
                s.sign_up_success = true;
                s.false_credential = false;
            }
            Err(_) => s.false_credential = true,
        });
        settle(&self.state, result)
    }

    async fn create_account(&self, request: &SignUpRequest) -> Result<AuthUser, AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }

        let user = self.auth.create_user(&request.email, &request.password).await?;
        let profile = User {
            id: user.uid.clone(),
            name: request.name.trim().to_string(),
            nim: request.nim.trim().to_string(),
            email: user.email.clone(),
            phone_number: request.phone_number.trim().to_string(),
        };
        self.repo
            .set_document(Collection::Users, &user.uid, &profile.profile_document())
            .await?;

        tracing::info!(uid = %user.uid, "User profile created");
        Ok(user)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<AuthUser, AppError> {
        begin(&self.state);

        let result = self
            .auth
            .sign_in(&credentials.email, &credentials.password)
            .await;
        self.state.send_modify(|s| match &result {
            Ok(user) => {
                s.user = Some(user.clone());
                s.false_credential = false;
            }
            Err(AppError::Authentication(_)) => s.false_credential = true,
            Err(_) => {}
        });
        settle(&self.state, result)
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out().await;
        self.state.send_modify(|s| {
            s.user = None;
            s.sign_up_success = false;
            s.false_credential = false;
        });
    }
}
