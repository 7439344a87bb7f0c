//! Post API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{respond, ApiResult};
use crate::models::{CreatePostRequest, Post, UpdatePostRequest};
use crate::AppState;

/// GET /api/posts - All posts, newest first.
pub async fn list_posts(State(state): State<AppState>) -> ApiResult<Vec<Post>> {
    let result = state.posts.fetch_posts().await;
    respond(&state, result).await
}

/// GET /api/posts/mine - Posts by the signed-in user.
pub async fn list_my_posts(State(state): State<AppState>) -> ApiResult<Vec<Post>> {
    let result = state.posts.fetch_user_posts().await;
    respond(&state, result).await
}

/// GET /api/posts/{id}
pub async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Post> {
    let result = state.posts.get_post(&id).await;
    respond(&state, result).await
}

/// POST /api/posts
pub async fn create_post(
    State(state): State<AppState>,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<Post> {
    let result = state.posts.add_post(&request).await;
    respond(&state, result).await
}

/// PUT /api/posts/{id} - Partial update by the author.
pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> ApiResult<Post> {
    let result = state.posts.update_post(&id, &request).await;
    respond(&state, result).await
}

/// DELETE /api/posts/{id}
pub async fn delete_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    let result = state.posts.delete_post(&id).await;
    respond(&state, result).await
}
