//! Post model: a lost or found item report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;
use super::User;

/// A lost/found item report stored under `posts/{postId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: User,
    pub item_name: String,
    pub description: String,
    pub location: String,
    #[serde(with = "timestamp::seconds")]
    pub post_date: DateTime<Utc>,
    /// `true` = lost, `false` = found
    pub status: bool,
}

impl Post {
    pub fn is_lost(&self) -> bool {
        self.status
    }

    pub fn status_label(&self) -> &'static str {
        if self.status {
            "LOST"
        } else {
            "FOUND"
        }
    }

    /// Whether `email` matches the stored author email.
    pub fn is_authored_by(&self, email: &str) -> bool {
        self.author.email.eq_ignore_ascii_case(email)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, changes: &UpdatePostRequest) {
        if let Some(item_name) = &changes.item_name {
            self.item_name = item_name.clone();
        }
        if let Some(description) = &changes.description {
            self.description = description.clone();
        }
        if let Some(location) = &changes.location {
            self.location = location.clone();
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
    }
}

/// Sort posts newest first by `post_date`.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.post_date.cmp(&a.post_date));
}

/// Request body for creating a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub item_name: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub status: bool,
}

/// Request body for updating a post. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<bool>,
}
