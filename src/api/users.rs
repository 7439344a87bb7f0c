//! Profile endpoints for the signed-in user.

use axum::{extract::State, Json};

use super::{respond, ApiResult};
use crate::models::{UpdateUserRequest, User};
use crate::AppState;

/// GET /api/me
pub async fn get_profile(State(state): State<AppState>) -> ApiResult<User> {
    let result = state.users.fetch_user().await;
    respond(&state, result).await
}

/// PUT /api/me - Partial profile update.
pub async fn update_profile(
    State(state): State<AppState>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    let result = state.users.update_user(&request).await;
    respond(&state, result).await
}
