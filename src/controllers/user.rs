//! Profile of the signed-in user.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::{begin, settle, HasStatus, Status};
use crate::auth::{validate_email, AuthService};
use crate::db::{Collection, Repository};
use crate::errors::AppError;
use crate::models::{UpdateUserRequest, User};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    #[serde(flatten)]
    pub status: Status,
    pub user: Option<User>,
    pub update_success: bool,
}

impl HasStatus for UserState {
    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

pub struct UserController {
    auth: Arc<AuthService>,
    repo: Arc<Repository>,
    state: watch::Sender<UserState>,
}

impl UserController {
    pub fn new(auth: Arc<AuthService>, repo: Arc<Repository>) -> Self {
        let (state, _) = watch::channel(UserState::default());
        Self { auth, repo, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<UserState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> UserState {
        self.state.borrow().clone()
    }

    pub async fn fetch_user(&self) -> Result<User, AppError> {
        begin(&self.state);
        let result = self.load_profile().await;
        if let Ok(user) = &result {
            self.state.send_modify(|s| s.user = Some(user.clone()));
        }
        settle(&self.state, result)
    }

    async fn load_profile(&self) -> Result<User, AppError> {
        let session = self.auth.require_user("view your profile").await?;
        let body = self
            .repo
            .get_document(Collection::Users, &session.uid)
            .await?
            .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))?;

        let mut user: User = serde_json::from_value(body)?;
        user.id = session.uid;
        Ok(user)
    }

    /// Merge the provided fields into the profile. Other fields keep their values.
    pub async fn update_user(&self, changes: &UpdateUserRequest) -> Result<User, AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.update_success = false);

        let result = self.merge_profile(changes).await;
        if let Ok(user) = &result {
            self.state.send_modify(|s| {
                s.user = Some(user.clone());
                s.update_success = true;
            });
        }
        settle(&self.state, result)
    }

    async fn merge_profile(&self, changes: &UpdateUserRequest) -> Result<User, AppError> {
        let session = self.auth.require_user("update your profile").await?;
        if changes.is_empty() {
            return Err(AppError::Validation("No fields to update".to_string()));
        }
        if let Some(email) = &changes.email {
            validate_email(email)?;
        }

        let merged = self
            .repo
            .update_document(Collection::Users, &session.uid, &changes.changed_fields())
            .await?;

        tracing::info!(uid = %session.uid, "User profile updated");
        let mut user: User = serde_json::from_value(merged)?;
        user.id = session.uid;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::fixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_partial_update_changes_only_given_fields() {
        let fx = fixture().await;
        let session = fx.auth.create_user("ana@uc.ac.id", "123456").await.unwrap();
        fx.repo
            .set_document(
                Collection::Users,
                &session.uid,
                &json!({ "name": "Ana", "nim": "0706", "email": "ana@uc.ac.id", "phoneNumber": "0811" }),
            )
            .await
            .unwrap();

        let controller = UserController::new(fx.auth.clone(), fx.repo.clone());
        let user = controller
            .update_user(&UpdateUserRequest {
                phone_number: Some("0899".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(user.phone_number, "0899");
        assert_eq!(user.name, "Ana");
        assert_eq!(user.nim, "0706");
        assert_eq!(user.email, "ana@uc.ac.id");
        assert!(controller.state().update_success);

        let fetched = controller.fetch_user().await.unwrap();
        assert_eq!(fetched, user);
    }

    #[tokio::test]
    async fn test_update_requires_a_field() {
        let fx = fixture().await;
        fx.auth.create_user("ana@uc.ac.id", "123456").await.unwrap();
        let controller = UserController::new(fx.auth.clone(), fx.repo.clone());

        let err = controller
            .update_user(&UpdateUserRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!controller.state().update_success);
        assert!(controller.state().status.error_message.is_some());
    }

    #[tokio::test]
    async fn test_fetch_requires_session() {
        let fx = fixture().await;
        let controller = UserController::new(fx.auth.clone(), fx.repo.clone());
        let err = controller.fetch_user().await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_fetch_missing_profile_is_not_found() {
        let fx = fixture().await;
        fx.auth.create_user("ana@uc.ac.id", "123456").await.unwrap();
        let controller = UserController::new(fx.auth.clone(), fx.repo.clone());
        let err = controller.fetch_user().await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
