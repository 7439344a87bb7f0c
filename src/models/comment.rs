//! Comment model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;
use super::User;

/// A comment on a post, stored under `comments/{commentId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author: User,
    pub text: String,
    #[serde(with = "timestamp::seconds")]
    pub comment_date: DateTime<Utc>,
    /// Absent on records written before comments were linked to posts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
}

/// Request body for adding a comment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_legacy_comment_without_post_id() {
        let comment: Comment = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "author": { "name": "Budi", "email": "budi@uc.ac.id" },
            "text": "Seen near the library",
            "commentDate": 1717000000
        }))
        .unwrap();
        assert!(comment.post_id.is_none());
        assert_eq!(comment.comment_date.timestamp(), 1_717_000_000);
    }
}
