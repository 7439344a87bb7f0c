//! Comment API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{respond, ApiResult};
use crate::models::{Comment, CreateCommentRequest};
use crate::AppState;

/// GET /api/posts/{id}/comments - Newest first.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> ApiResult<Vec<Comment>> {
    let result = state.comments.fetch_comments(&post_id).await;
    respond(&state, result).await
}

/// POST /api/posts/{id}/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> ApiResult<Comment> {
    let result = state.comments.add_comment(&post_id, &request.text).await;
    respond(&state, result).await
}
