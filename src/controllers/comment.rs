//! Comments on posts.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::{begin, decode_documents, resolve_author, settle, HasStatus, Status};
use crate::auth::AuthService;
use crate::db::{Collection, Repository};
use crate::errors::AppError;
use crate::models::{timestamp, Comment};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentState {
    #[serde(flatten)]
    pub status: Status,
    /// Post whose comments are loaded
    pub post_id: Option<String>,
    pub comments: Vec<Comment>,
    pub add_success: bool,
}

impl HasStatus for CommentState {
    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

pub struct CommentController {
    auth: Arc<AuthService>,
    repo: Arc<Repository>,
    state: watch::Sender<CommentState>,
}

impl CommentController {
    pub fn new(auth: Arc<AuthService>, repo: Arc<Repository>) -> Self {
        let (state, _) = watch::channel(CommentState::default());
        Self { auth, repo, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<CommentState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CommentState {
        self.state.borrow().clone()
    }

    pub async fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment, AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.add_success = false);

        let result = self.create_comment(post_id, text).await;
        if let Ok(comment) = &result {
            self.state.send_modify(|s| {
                if s.post_id.as_deref() != Some(post_id) {
                    s.post_id = Some(post_id.to_string());
                    s.comments.clear();
                }
                s.comments.insert(0, comment.clone());
                s.add_success = true;
            });
        }
        settle(&self.state, result)
    }

    async fn create_comment(&self, post_id: &str, text: &str) -> Result<Comment, AppError> {
        let session = self.auth.require_user("comment").await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Comment cannot be empty".to_string()));
        }
        if self
            .repo
            .get_document(Collection::Posts, post_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!("Post {} not found", post_id)));
        }

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            author: resolve_author(&self.repo, &session).await?,
            text: text.to_string(),
            comment_date: timestamp::now(),
            post_id: Some(post_id.to_string()),
        };
        self.repo
            .set_document(
                Collection::Comments,
                &comment.id,
                &serde_json::to_value(&comment)?,
            )
            .await?;

        tracing::info!(comment_id = %comment.id, post_id = %post_id, "Comment added");
        Ok(comment)
    }

    /// Comments of one post, newest first.
    pub async fn fetch_comments(&self, post_id: &str) -> Result<Vec<Comment>, AppError> {
        begin(&self.state);
        let result = self.load_comments(post_id).await;
        if let Ok(comments) = &result {
            self.state.send_modify(|s| {
                s.post_id = Some(post_id.to_string());
                s.comments = comments.clone();
            });
        }
        settle(&self.state, result)
    }

    async fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>, AppError> {
        let documents = self
            .repo
            .query_documents(Collection::Comments, "postId", post_id)
            .await?;
        let mut comments: Vec<Comment> = decode_documents(Collection::Comments, documents);
        comments.sort_by(|a, b| b.comment_date.cmp(&a.comment_date));
        Ok(comments)
    }
}
