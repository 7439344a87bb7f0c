//! Controllers driving the board.
//!
//! Each controller owns a state struct published through a `watch` channel.
//! Operations return `Result`, and every failure is also recorded in the
//! state's [`Status`] so subscribers can show it.

mod auth;
mod comment;
mod post;
mod user;

pub use auth::*;
pub use comment::*;
pub use post::*;
pub use user::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use crate::auth::AuthUser;
use crate::db::{Collection, Document, Repository};
use crate::errors::AppError;
use crate::models::User;

/// Name given to authors whose profile document is missing.
const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Loading flag and last error shared by every controller state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub is_loading: bool,
    pub error_message: Option<String>,
}

pub trait HasStatus {
    fn status_mut(&mut self) -> &mut Status;
}

fn begin<S: HasStatus>(state: &watch::Sender<S>) {
    state.send_modify(|s| {
        let status = s.status_mut();
        status.is_loading = true;
        status.error_message = None;
    });
}

/// Clear the loading flag and record the error, if any.
fn settle<S: HasStatus, T>(
    state: &watch::Sender<S>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    state.send_modify(|s| {
        let status = s.status_mut();
        status.is_loading = false;
        if let Err(e) = &result {
            status.error_message = Some(e.message());
        }
    });
    result
}

/// The profile embedded as author in new posts and comments.
async fn resolve_author(repo: &Repository, user: &AuthUser) -> Result<User, AppError> {
    let profile = match repo.get_document(Collection::Users, &user.uid).await {
        Ok(Some(body)) => match serde_json::from_value::<User>(body) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(uid = %user.uid, "Unreadable profile, posting anonymously: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(AppError::Decode(e)) => {
            tracing::warn!(uid = %user.uid, "Unreadable profile, posting anonymously: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    let mut author = profile.unwrap_or_else(|| User {
        name: ANONYMOUS_AUTHOR.to_string(),
        ..Default::default()
    });
    // Ownership checks compare against the account email, so the embedded
    // author must carry it even when the profile email differs.
    author.id = user.uid.clone();
    author.email = user.email.clone();
    Ok(author)
}

/// Decode each document on its own, skipping and logging the ones that fail.
fn decode_documents<T: DeserializeOwned>(collection: Collection, documents: Vec<Document>) -> Vec<T> {
    documents
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<T>(doc.body) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "Skipping undecodable record {}/{}: {}",
                    collection.as_str(),
                    doc.key,
                    e
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::auth::AuthService;
    use crate::db::{init_database, Repository};
    use crate::search::SearchIndex;

    pub struct Fixture {
        pub repo: Arc<Repository>,
        pub auth: Arc<AuthService>,
        pub search: Arc<SearchIndex>,
        _dir: TempDir,
    }

    pub async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        let repo = Arc::new(Repository::new(pool));
        let auth = Arc::new(AuthService::new(repo.clone()));
        let search = Arc::new(SearchIndex::open(&dir.path().join("index")).unwrap());
        Fixture {
            repo,
            auth,
            search,
            _dir: dir,
        }
    }
}
