//! Account and session endpoints.

use axum::{extract::State, Json};

use super::{respond, ApiResult};
use crate::auth::AuthUser;
use crate::models::{Credentials, SignUpRequest};
use crate::AppState;

/// POST /api/auth/signup - Create an account and sign it in.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<AuthUser> {
    let result = state.auth.sign_up(&request).await;
    respond(&state, result).await
}

/// POST /api/auth/signin
pub async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<AuthUser> {
    let result = state.auth.sign_in(&credentials).await;
    respond(&state, result).await
}

/// POST /api/auth/signout
pub async fn sign_out(State(state): State<AppState>) -> ApiResult<()> {
    state.auth.sign_out().await;
    respond(&state, Ok(())).await
}

/// GET /api/auth/session - The signed-in user, or null.
pub async fn get_session(State(state): State<AppState>) -> ApiResult<Option<AuthUser>> {
    let user = state.auth.check_session().await;
    respond(&state, Ok(user)).await
}
