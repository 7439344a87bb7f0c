//! Primary-side broadcaster.
//!
//! Keeps the companion's view of the post list eventually consistent using
//! the two transport channels: a whole-list context push after every change
//! and a best-effort direct message for a single created/updated post.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::transport::RelayTransport;
use crate::models::{timestamp, Post, RelayDelta, RelaySnapshot};

/// What happened to a push or send. None of these are errors for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the transport.
    Sent,
    /// Held until the session activates.
    Deferred,
    /// Not delivered; the next context push reconciles.
    Dropped(String),
}

pub struct Broadcaster {
    transport: Arc<dyn RelayTransport>,
    /// Latest list pushed before activation.
    deferred: Mutex<Option<Vec<Post>>>,
    sequence: AtomicU64,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            transport,
            deferred: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    /// Replace the companion's context with the full post list.
    pub fn push_context(&self, posts: &[Post]) -> DeliveryOutcome {
        if !self.transport.is_activated() {
            *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(posts.to_vec());
            tracing::debug!(
                "Relay session not activated; deferring context push of {} posts",
                posts.len()
            );
            return DeliveryOutcome::Deferred;
        }
        self.send_snapshot(posts.to_vec())
    }

    /// Best-effort point update for one post.
    pub fn send_post_update(&self, post: &Post) -> DeliveryOutcome {
        if !self.transport.is_activated() {
            tracing::debug!(post_id = %post.id, "Relay session not activated; dropping post update");
            return DeliveryOutcome::Dropped("session not activated".to_string());
        }
        if !self.transport.is_reachable() {
            tracing::info!(post_id = %post.id, "Companion not reachable; dropping post update");
            return DeliveryOutcome::Dropped("companion not reachable".to_string());
        }

        let delta = RelayDelta { post: post.clone() };
        match delta
            .to_payload()
            .and_then(|payload| self.transport.send_message(payload))
        {
            Ok(()) => {
                tracing::debug!(post_id = %post.id, status = post.status_label(), "Sent post update to companion");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(post_id = %post.id, "Failed to send post update: {}", e);
                DeliveryOutcome::Dropped(e.message())
            }
        }
    }

    /// Flush the deferred list once the session is up. Issues exactly one
    /// context push when anything was deferred.
    pub fn on_activated(&self) -> Option<DeliveryOutcome> {
        let deferred = self
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        deferred.map(|posts| self.send_snapshot(posts))
    }

    fn send_snapshot(&self, posts: Vec<Post>) -> DeliveryOutcome {
        let count = posts.len();
        let snapshot = RelaySnapshot {
            posts,
            sent_at: timestamp::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        };

        match snapshot
            .to_payload()
            .and_then(|payload| self.transport.update_context(payload))
        {
            Ok(()) => {
                tracing::debug!(sequence = snapshot.sequence, "Pushed context with {} posts", count);
                DeliveryOutcome::Sent
            }
            Err(e) => {
                tracing::warn!("Failed to push context: {}", e);
                DeliveryOutcome::Dropped(e.message())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, KEY_ALL_POSTS, KEY_SEQUENCE, KEY_UPDATED_POST};
    use crate::relay::memory::MemoryTransport;
    use crate::relay::transport::TransportEvent;

    fn post(id: &str, status: bool) -> Post {
        Post {
            id: id.to_string(),
            author: User::default(),
            item_name: format!("Item {}", id),
            description: String::new(),
            location: "Hall".to_string(),
            post_date: timestamp::now(),
            status,
        }
    }

    #[test]
    fn test_push_before_activation_is_deferred_then_flushed_once() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        companion.activate();
        let _ = companion_rx.try_recv();

        let broadcaster = Broadcaster::new(Arc::new(primary.clone()));
        assert_eq!(
            broadcaster.push_context(&[post("a", true)]),
            DeliveryOutcome::Deferred
        );
        assert_eq!(
            broadcaster.push_context(&[post("a", true), post("b", true)]),
            DeliveryOutcome::Deferred
        );

        primary.activate();
        let _ = companion_rx.try_recv(); // reachability
        assert_eq!(broadcaster.on_activated(), Some(DeliveryOutcome::Sent));
        assert_eq!(broadcaster.on_activated(), None);

        match companion_rx.try_recv().unwrap() {
            TransportEvent::ContextReceived(payload) => {
                assert_eq!(payload[KEY_ALL_POSTS].as_array().unwrap().len(), 2);
                assert_eq!(payload[KEY_SEQUENCE], 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(companion_rx.try_recv().is_err());
    }

    #[test]
    fn test_post_update_dropped_when_unreachable() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        companion.activate();
        let _ = companion_rx.try_recv();
        primary.set_reachable(false);
        let _ = companion_rx.try_recv();

        let broadcaster = Broadcaster::new(Arc::new(primary));
        let outcome = broadcaster.send_post_update(&post("a", true));
        assert!(matches!(outcome, DeliveryOutcome::Dropped(_)));
        assert!(companion_rx.try_recv().is_err());
    }

    #[test]
    fn test_post_update_sent_as_message() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        companion.activate();
        let _ = companion_rx.try_recv();

        let broadcaster = Broadcaster::new(Arc::new(primary));
        assert_eq!(
            broadcaster.send_post_update(&post("a", false)),
            DeliveryOutcome::Sent
        );
        match companion_rx.try_recv().unwrap() {
            TransportEvent::MessageReceived(payload) => {
                assert_eq!(payload[KEY_UPDATED_POST]["id"], "a");
                assert_eq!(payload[KEY_UPDATED_POST]["status"], false);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        companion.activate();
        let _ = companion_rx.try_recv();

        let broadcaster = Broadcaster::new(Arc::new(primary));
        broadcaster.push_context(&[]);
        broadcaster.push_context(&[]);

        let mut sequences = Vec::new();
        while let Ok(TransportEvent::ContextReceived(payload)) = companion_rx.try_recv() {
            sequences.push(payload[KEY_SEQUENCE].as_u64().unwrap());
        }
        assert_eq!(sequences, vec![1, 2]);
    }
}
