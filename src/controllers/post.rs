//! Posts: the authoritative list, author-checked mutations, search, and the
//! primary side of the companion relay.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use super::{begin, decode_documents, resolve_author, settle, HasStatus, Status};
use crate::auth::{AuthService, AuthUser};
use crate::db::{Collection, Repository};
use crate::errors::AppError;
use crate::models::{
    sort_newest_first, timestamp, CreatePostRequest, Post, RelayMessage, UpdatePostRequest,
};
use crate::relay::{Broadcaster, DeliveryOutcome, EventStream, TransportEvent};
use crate::search::SearchIndex;

/// Upper bound on index hits considered before filtering and paging.
const MAX_SEARCH_HITS: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostState {
    #[serde(flatten)]
    pub status: Status,
    pub posts: Vec<Post>,
    pub user_posts: Vec<Post>,
    pub selected_post: Option<Post>,
    pub search_results: Vec<Post>,
    pub create_success: bool,
    pub update_success: bool,
    pub delete_success: bool,
}

impl HasStatus for PostState {
    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

/// Search filter on the lost/found flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    /// `Some(true)` = lost only, `Some(false)` = found only
    pub status: Option<bool>,
}

pub struct PostController {
    repo: Arc<Repository>,
    auth: Arc<AuthService>,
    search: Arc<SearchIndex>,
    broadcaster: Arc<Broadcaster>,
    state: watch::Sender<PostState>,
}

impl PostController {
    pub fn new(
        repo: Arc<Repository>,
        auth: Arc<AuthService>,
        search: Arc<SearchIndex>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let (state, _) = watch::channel(PostState::default());
        Self {
            repo,
            auth,
            search,
            broadcaster,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PostState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PostState {
        self.state.borrow().clone()
    }

    // ==================== READS ====================

    /// Load every post, newest first, and push the list to the companion.
    pub async fn fetch_posts(&self) -> Result<Vec<Post>, AppError> {
        begin(&self.state);
        let result = self.load_posts().await;
        if let Ok(posts) = &result {
            self.state.send_modify(|s| s.posts = posts.clone());
            self.broadcaster.push_context(posts);
        }
        settle(&self.state, result)
    }

    /// Posts authored by the signed-in user.
    pub async fn fetch_user_posts(&self) -> Result<Vec<Post>, AppError> {
        begin(&self.state);
        let result = self.load_user_posts().await;
        if let Ok(posts) = &result {
            self.state.send_modify(|s| s.user_posts = posts.clone());
        }
        settle(&self.state, result)
    }

    async fn load_user_posts(&self) -> Result<Vec<Post>, AppError> {
        let session = self.auth.require_user("view your posts").await?;
        let mut posts = self.load_posts().await?;
        posts.retain(|post| post.is_authored_by(&session.email));
        Ok(posts)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Post, AppError> {
        begin(&self.state);
        let result = self.load_post(post_id).await;
        if let Ok(post) = &result {
            self.state.send_modify(|s| s.selected_post = Some(post.clone()));
        }
        settle(&self.state, result)
    }

    async fn load_posts(&self) -> Result<Vec<Post>, AppError> {
        let documents = self.repo.list_documents(Collection::Posts).await?;
        let mut posts: Vec<Post> = decode_documents(Collection::Posts, documents);
        sort_newest_first(&mut posts);
        Ok(posts)
    }

    async fn load_post(&self, post_id: &str) -> Result<Post, AppError> {
        let body = self
            .repo
            .get_document(Collection::Posts, post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
        Ok(serde_json::from_value(body)?)
    }

    // ==================== MUTATIONS ====================

    pub async fn add_post(&self, request: &CreatePostRequest) -> Result<Post, AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.create_success = false);

        let result = self.create_post(request).await;
        if let Ok(post) = &result {
            self.after_write(post, |s| s.create_success = true).await;
        }
        settle(&self.state, result)
    }

    async fn create_post(&self, request: &CreatePostRequest) -> Result<Post, AppError> {
        let session = self.auth.require_user("create a post").await?;
        validate_required("Item name", &request.item_name)?;
        validate_required("Location", &request.location)?;

        let post = Post {
            id: uuid::Uuid::new_v4().to_string(),
            author: resolve_author(&self.repo, &session).await?,
            item_name: request.item_name.trim().to_string(),
            description: request.description.trim().to_string(),
            location: request.location.trim().to_string(),
            post_date: timestamp::now(),
            status: request.status,
        };
        self.repo
            .set_document(Collection::Posts, &post.id, &serde_json::to_value(&post)?)
            .await?;

        tracing::info!(post_id = %post.id, status = post.status_label(), "Post created");
        Ok(post)
    }

    pub async fn update_post(
        &self,
        post_id: &str,
        changes: &UpdatePostRequest,
    ) -> Result<Post, AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.update_success = false);

        let result = self.apply_update(post_id, changes).await;
        if let Ok(post) = &result {
            self.after_write(post, |s| s.update_success = true).await;
        }
        settle(&self.state, result)
    }

    async fn apply_update(
        &self,
        post_id: &str,
        changes: &UpdatePostRequest,
    ) -> Result<Post, AppError> {
        let session = self.auth.require_user("update a post").await?;
        if let Some(item_name) = &changes.item_name {
            validate_required("Item name", item_name)?;
        }
        if let Some(location) = &changes.location {
            validate_required("Location", location)?;
        }

        let mut post = self.load_post(post_id).await?;
        ensure_author(&post, &session, "edit")?;

        post.apply(&UpdatePostRequest {
            item_name: changes.item_name.as_ref().map(|v| v.trim().to_string()),
            description: changes.description.as_ref().map(|v| v.trim().to_string()),
            location: changes.location.as_ref().map(|v| v.trim().to_string()),
            status: changes.status,
        });
        self.repo
            .set_document(Collection::Posts, &post.id, &serde_json::to_value(&post)?)
            .await?;

        tracing::info!(post_id = %post.id, status = post.status_label(), "Post updated");
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<(), AppError> {
        begin(&self.state);
        self.state.send_modify(|s| s.delete_success = false);

        let result = self.remove_post(post_id).await;
        if result.is_ok() {
            if let Err(e) = self.search.remove_post(post_id).await {
                tracing::warn!("Failed to remove post from index: {}", e);
            }
            let mut posts = Vec::new();
            self.state.send_modify(|s| {
                s.posts.retain(|p| p.id != post_id);
                s.user_posts.retain(|p| p.id != post_id);
                if s.selected_post.as_ref().is_some_and(|p| p.id == post_id) {
                    s.selected_post = None;
                }
                s.delete_success = true;
                posts = s.posts.clone();
            });
            self.broadcaster.push_context(&posts);
        }
        settle(&self.state, result)
    }

    async fn remove_post(&self, post_id: &str) -> Result<(), AppError> {
        let session = self.auth.require_user("delete a post").await?;
        let post = self.load_post(post_id).await?;
        ensure_author(&post, &session, "delete")?;

        self.repo.remove_document(Collection::Posts, post_id).await?;
        tracing::info!(post_id = %post_id, "Post deleted");
        Ok(())
    }

    /// Index, fold into the local lists, then tell the companion.
    async fn after_write(&self, post: &Post, mark: impl FnOnce(&mut PostState)) {
        if let Err(e) = self.search.index_post(post).await {
            tracing::warn!("Failed to index post: {}", e);
        }

        let mut posts = Vec::new();
        self.state.send_modify(|s| {
            upsert(&mut s.posts, post);
            if s.user_posts.iter().any(|p| p.id == post.id) {
                upsert(&mut s.user_posts, post);
            }
            if s.selected_post.as_ref().is_some_and(|p| p.id == post.id) {
                s.selected_post = Some(post.clone());
            }
            mark(s);
            posts = s.posts.clone();
        });

        if let DeliveryOutcome::Dropped(reason) = self.broadcaster.send_post_update(post) {
            tracing::debug!(post_id = %post.id, "Post update not relayed: {}", reason);
        }
        self.broadcaster.push_context(&posts);
    }

    // ==================== SEARCH ====================

    /// Full-text search; hits whose post no longer exists are dropped.
    pub async fn search_posts(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Post>, AppError> {
        begin(&self.state);
        let result = self.run_search(query, options).await;
        if let Ok(posts) = &result {
            self.state.send_modify(|s| s.search_results = posts.clone());
        }
        settle(&self.state, result)
    }

    async fn run_search(&self, query: &str, options: SearchOptions) -> Result<Vec<Post>, AppError> {
        let hits = self.search.search(query, MAX_SEARCH_HITS, 0)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<String, Post> = self
            .load_posts()
            .await?
            .into_iter()
            .map(|post| (post.id.clone(), post))
            .collect();

        Ok(hits
            .into_iter()
            .filter_map(|hit| by_id.remove(&hit.post_id))
            .filter(|post| options.status.map_or(true, |lost| post.status == lost))
            .skip(options.offset)
            .take(options.limit)
            .collect())
    }

    /// Re-index every stored post.
    pub async fn rebuild_index(&self) -> Result<usize, AppError> {
        let posts = self.load_posts().await?;
        self.search.rebuild(&posts).await?;
        Ok(posts.len())
    }

    // ==================== RELAY ====================

    /// The companion asked for everything again.
    pub async fn handle_refresh_request(&self) {
        tracing::info!("Companion requested a refresh");
        if let Err(e) = self.fetch_posts().await {
            tracing::warn!("Refresh for companion failed: {}", e);
        }
        if self.auth.current_user().await.is_some() {
            if let Err(e) = self.fetch_user_posts().await {
                tracing::warn!("Refreshing own posts failed: {}", e);
            }
        }
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Activated { error: None } => {
                tracing::info!("Relay session activated");
                if self.broadcaster.on_activated().is_none() {
                    if let Err(e) = self.fetch_posts().await {
                        tracing::warn!("Initial push to companion failed: {}", e);
                    }
                }
            }
            TransportEvent::Activated { error: Some(error) } => {
                tracing::warn!("Relay session activation failed: {}", error);
            }
            TransportEvent::ReachabilityChanged(reachable) => {
                tracing::info!(reachable, "Companion reachability changed");
            }
            TransportEvent::MessageReceived(message) => match RelayMessage::classify(&message) {
                RelayMessage::RefreshRequest => self.handle_refresh_request().await,
                RelayMessage::UpdatedPost(_) => {
                    tracing::debug!("Ignoring post update sent to primary");
                }
                RelayMessage::Unknown => {
                    tracing::warn!("Ignoring unrecognized relay message: {:?}", message);
                }
            },
            TransportEvent::ContextReceived(_) => {
                tracing::debug!("Ignoring context sent to primary");
            }
            TransportEvent::DeliveryFailed(reason) => {
                tracing::warn!("Relay delivery failed: {}", reason);
            }
        }
    }

    /// Drain primary-side transport events until the transport goes away.
    pub async fn run_relay(&self, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Relay event stream closed");
    }

    /// Re-fetch whenever the post collection changes in the store.
    pub async fn observe_changes(&self) {
        let mut changes = self.repo.subscribe();
        loop {
            match changes.recv().await {
                Ok(change) if change.collection == Collection::Posts => {
                    if let Err(e) = self.fetch_posts().await {
                        tracing::warn!("Re-fetch after change failed: {}", e);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Change feed lagged; re-fetching");
                    if let Err(e) = self.fetch_posts().await {
                        tracing::warn!("Re-fetch after change failed: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

fn validate_required(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", label)));
    }
    Ok(())
}

/// Only the author may change a post. Compared by account email.
fn ensure_author(post: &Post, session: &AuthUser, verb: &str) -> Result<(), AppError> {
    if post.is_authored_by(&session.email) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "You can only {} your own posts",
            verb
        )))
    }
}

fn upsert(posts: &mut Vec<Post>, post: &Post) {
    match posts.iter_mut().find(|p| p.id == post.id) {
        Some(existing) => *existing = post.clone(),
        None => posts.push(post.clone()),
    }
    sort_newest_first(posts);
}
