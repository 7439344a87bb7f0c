//! Payloads exchanged between the primary device and its companion.
//!
//! Payloads are plain string-keyed mappings. Records are serialized into
//! mappings before sending and decoded again on receipt.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::timestamp;
use super::Post;
use crate::errors::AppError;

/// A relay payload: string keys to plain values.
pub type Payload = Map<String, Value>;

/// Snapshot key holding the full post collection.
pub const KEY_ALL_POSTS: &str = "allPosts";
/// Snapshot key holding the send time in seconds since the epoch.
pub const KEY_LAST_UPDATE: &str = "lastUpdate";
/// Snapshot key holding the broadcaster's monotonic sequence number.
pub const KEY_SEQUENCE: &str = "sequence";
/// Message key holding a single changed post.
pub const KEY_UPDATED_POST: &str = "updatedPost";
/// Message key naming a request from the companion.
pub const KEY_REQUEST: &str = "request";
/// The only request the companion sends.
pub const REQUEST_REFRESH_POSTS: &str = "refreshPosts";

/// Full authoritative post list pushed as the application context.
#[derive(Debug, Clone)]
pub struct RelaySnapshot {
    pub posts: Vec<Post>,
    pub sent_at: DateTime<Utc>,
    pub sequence: u64,
}

impl RelaySnapshot {
    pub fn to_payload(&self) -> Result<Payload, AppError> {
        let posts = self
            .posts
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        let mut payload = Payload::new();
        payload.insert(KEY_ALL_POSTS.to_string(), Value::Array(posts));
        payload.insert(
            KEY_LAST_UPDATE.to_string(),
            Value::from(timestamp::to_seconds(&self.sent_at)),
        );
        payload.insert(KEY_SEQUENCE.to_string(), Value::from(self.sequence));
        Ok(payload)
    }
}

/// A single post sent as a direct message after create/update.
#[derive(Debug, Clone)]
pub struct RelayDelta {
    pub post: Post,
}

impl RelayDelta {
    pub fn to_payload(&self) -> Result<Payload, AppError> {
        let mut payload = Payload::new();
        payload.insert(KEY_UPDATED_POST.to_string(), serde_json::to_value(&self.post)?);
        Ok(payload)
    }
}

/// Payload of the companion's refresh request.
pub fn refresh_request() -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        KEY_REQUEST.to_string(),
        Value::String(REQUEST_REFRESH_POSTS.to_string()),
    );
    payload
}

/// Classification of an inbound direct message.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage<'a> {
    /// Raw, not yet decoded, post mapping
    UpdatedPost(&'a Value),
    RefreshRequest,
    Unknown,
}

impl<'a> RelayMessage<'a> {
    pub fn classify(payload: &'a Payload) -> Self {
        if let Some(post) = payload.get(KEY_UPDATED_POST) {
            return RelayMessage::UpdatedPost(post);
        }
        match payload.get(KEY_REQUEST).and_then(Value::as_str) {
            Some(REQUEST_REFRESH_POSTS) => RelayMessage::RefreshRequest,
            _ => RelayMessage::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            author: User::default(),
            item_name: "Umbrella".to_string(),
            description: String::new(),
            location: "Gate A".to_string(),
            post_date: timestamp::now(),
            status: true,
        }
    }

    #[test]
    fn test_snapshot_payload_keys() {
        let snapshot = RelaySnapshot {
            posts: vec![post("a"), post("b")],
            sent_at: timestamp::now(),
            sequence: 7,
        };
        let payload = snapshot.to_payload().unwrap();
        assert_eq!(payload[KEY_ALL_POSTS].as_array().unwrap().len(), 2);
        assert!(payload[KEY_LAST_UPDATE].is_f64());
        assert_eq!(payload[KEY_SEQUENCE], 7);
    }

    #[test]
    fn test_classify_messages() {
        let delta = RelayDelta { post: post("a") }.to_payload().unwrap();
        assert!(matches!(
            RelayMessage::classify(&delta),
            RelayMessage::UpdatedPost(_)
        ));
        assert_eq!(
            RelayMessage::classify(&refresh_request()),
            RelayMessage::RefreshRequest
        );
        assert_eq!(RelayMessage::classify(&Payload::new()), RelayMessage::Unknown);
    }
}
