//! Companion-side receiver.
//!
//! Maintains the local list of lost posts from the primary's context pushes
//! and direct messages. All mutation happens in [`CompanionReceiver::handle_event`],
//! which the owner drives from a single task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use super::memory::EventStream;
use super::transport::{RelayTransport, TransportEvent};
use crate::errors::AppError;
use crate::models::{
    refresh_request, sort_newest_first, timestamp, Payload, Post, RelayMessage, KEY_ALL_POSTS,
    KEY_LAST_UPDATE, KEY_SEQUENCE,
};

const CUE_CAPACITY: usize = 32;
const UNREACHABLE_MESSAGE: &str = "Primary device is not reachable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiverPhase {
    #[default]
    Uninitialized,
    Activating,
    /// Activated, nothing received yet.
    Idle,
    Populated,
}

/// Haptic-style cue raised for direct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertCue {
    /// A lost post was added or changed.
    Notification,
    /// A post was marked found and removed.
    Success,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverState {
    pub phase: ReceiverPhase,
    pub lost_posts: Vec<Post>,
    pub last_error: Option<String>,
    #[serde(serialize_with = "timestamp::optional_seconds::serialize")]
    pub last_update: Option<DateTime<Utc>>,
    pub last_sequence: Option<u64>,
}

pub struct CompanionReceiver {
    transport: Arc<dyn RelayTransport>,
    state: watch::Sender<ReceiverState>,
    cues: broadcast::Sender<AlertCue>,
}

impl CompanionReceiver {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        let (state, _) = watch::channel(ReceiverState::default());
        let (cues, _) = broadcast::channel(CUE_CAPACITY);
        Self {
            transport,
            state,
            cues,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    pub fn subscribe_cues(&self) -> broadcast::Receiver<AlertCue> {
        self.cues.subscribe()
    }

    pub fn state(&self) -> ReceiverState {
        self.state.borrow().clone()
    }

    /// Begin activating the session. Completion arrives as an event.
    pub fn start(&self) {
        self.state.send_modify(|state| {
            if state.phase == ReceiverPhase::Uninitialized {
                state.phase = ReceiverPhase::Activating;
            }
        });
        self.transport.activate();
    }

    /// Drain transport events until the transport goes away.
    pub async fn run(&self, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::info!("Relay event stream closed; receiver stopped");
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Activated { error: Some(error) } => {
                tracing::warn!("Relay session activation failed: {}", error);
                self.record_error(format!("Session activation failed: {}", error));
            }
            TransportEvent::Activated { error: None } => {
                tracing::info!("Relay session activated");
                self.state.send_modify(|state| {
                    if matches!(
                        state.phase,
                        ReceiverPhase::Uninitialized | ReceiverPhase::Activating
                    ) {
                        state.phase = ReceiverPhase::Idle;
                    }
                });
                if let Some(context) = self.transport.received_context() {
                    self.apply_context(&context);
                }
                if self.transport.is_reachable() {
                    let _ = self.request_refresh();
                }
            }
            TransportEvent::ReachabilityChanged(true) => {
                tracing::info!("Primary device reachable");
                self.state.send_modify(|state| state.last_error = None);
                let _ = self.request_refresh();
            }
            TransportEvent::ReachabilityChanged(false) => {
                tracing::info!("Primary device unreachable");
                self.record_error(UNREACHABLE_MESSAGE.to_string());
            }
            TransportEvent::ContextReceived(context) => self.apply_context(&context),
            TransportEvent::MessageReceived(message) => match RelayMessage::classify(&message) {
                RelayMessage::UpdatedPost(post) => {
                    self.apply_update(post);
                }
                RelayMessage::RefreshRequest => {
                    tracing::debug!("Ignoring refresh request sent to companion");
                }
                RelayMessage::Unknown => {
                    tracing::warn!("Ignoring unrecognized relay message: {:?}", message);
                }
            },
            TransportEvent::DeliveryFailed(reason) => {
                tracing::warn!("Relay delivery failed: {}", reason);
                self.record_error(format!("Failed to reach primary device: {}", reason));
            }
        }
    }

    /// Replace the local list with the lost posts of a full snapshot.
    pub fn apply_context(&self, context: &Payload) {
        let Some(entries) = context.get(KEY_ALL_POSTS).and_then(Value::as_array) else {
            tracing::warn!("Context without a post list; keeping current list");
            self.record_error("Received an update without a post list.".to_string());
            return;
        };

        let mut skipped = 0usize;
        let mut lost_posts = Vec::new();
        for entry in entries {
            match Post::deserialize(entry) {
                Ok(post) if post.is_lost() => lost_posts.push(post),
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    tracing::warn!("Skipping undecodable post in context: {}", e);
                }
            }
        }
        sort_newest_first(&mut lost_posts);

        let last_update = context
            .get(KEY_LAST_UPDATE)
            .and_then(Value::as_f64)
            .and_then(timestamp::from_seconds)
            .unwrap_or_else(timestamp::now);
        let sequence = context.get(KEY_SEQUENCE).and_then(Value::as_u64);

        self.state.send_modify(|state| {
            if let (Some(received), Some(applied)) = (sequence, state.last_sequence) {
                if received < applied {
                    tracing::warn!(
                        received,
                        applied,
                        "Applying context older than the last one applied"
                    );
                }
            }

            tracing::debug!(
                lost = lost_posts.len(),
                skipped,
                "Applied context from primary"
            );
            state.lost_posts = lost_posts;
            state.last_update = Some(last_update);
            if sequence.is_some() {
                state.last_sequence = sequence;
            }
            state.last_error = (skipped > 0)
                .then(|| format!("Skipped {} posts that could not be read.", skipped));
            state.phase = ReceiverPhase::Populated;
        });
    }

    /// Apply a single-post delta. Returns the cue raised, if any.
    pub fn apply_update(&self, raw: &Value) -> Option<AlertCue> {
        let post = match Post::deserialize(raw) {
            Ok(post) => post,
            Err(e) => {
                tracing::warn!("Failed to decode updated post: {}", e);
                self.record_error(format!("Failed to read updated post: {}", e));
                return None;
            }
        };

        let mut cue = None;
        self.state.send_modify(|state| {
            let existing = state.lost_posts.iter().position(|p| p.id == post.id);
            if post.is_lost() {
                match existing {
                    Some(index) => state.lost_posts[index] = post,
                    None => state.lost_posts.push(post),
                }
                cue = Some(AlertCue::Notification);
            } else if let Some(index) = existing {
                state.lost_posts.remove(index);
                cue = Some(AlertCue::Success);
            }
            sort_newest_first(&mut state.lost_posts);
            state.last_update = Some(timestamp::now());
        });

        if let Some(cue) = cue {
            // No subscribers is fine.
            let _ = self.cues.send(cue);
        }
        cue
    }

    /// Ask the primary to re-send everything.
    pub fn request_refresh(&self) -> Result<(), AppError> {
        let result = if !self.transport.is_activated() {
            Err(AppError::Transport("Session not activated".to_string()))
        } else if !self.transport.is_reachable() {
            Err(AppError::Transport(UNREACHABLE_MESSAGE.to_string()))
        } else {
            self.transport.send_message(refresh_request())
        };

        match &result {
            Ok(()) => tracing::debug!("Requested refresh from primary"),
            Err(e) => {
                tracing::info!("Refresh request failed: {}", e);
                self.record_error(e.message());
            }
        }
        result
    }

    fn record_error(&self, message: String) {
        self.state.send_modify(|state| state.last_error = Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelayDelta, RelaySnapshot, User};
    use crate::relay::memory::MemoryTransport;
    use serde_json::json;

    fn post(id: &str, name: &str, status: bool, secs: f64) -> Post {
        Post {
            id: id.to_string(),
            author: User {
                name: "Ana".to_string(),
                email: "ana@uc.ac.id".to_string(),
                ..Default::default()
            },
            item_name: name.to_string(),
            description: String::new(),
            location: "Cafeteria".to_string(),
            post_date: timestamp::from_seconds(secs).unwrap(),
            status,
        }
    }

    fn snapshot(posts: Vec<Post>, sequence: u64) -> Payload {
        RelaySnapshot {
            posts,
            sent_at: timestamp::now(),
            sequence,
        }
        .to_payload()
        .unwrap()
    }

    fn receiver() -> CompanionReceiver {
        let ((_, _), (companion, _)) = MemoryTransport::pair();
        CompanionReceiver::new(Arc::new(companion))
    }

    fn ids(state: &ReceiverState) -> Vec<&str> {
        state.lost_posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_last_context_wins_and_keeps_only_lost() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(
            vec![post("a", "Keys", true, 100.0), post("b", "Phone", true, 200.0)],
            1,
        ));
        receiver.apply_context(&snapshot(
            vec![
                post("c", "Wallet", true, 300.0),
                post("d", "Umbrella", false, 400.0),
                post("e", "Card", true, 500.0),
            ],
            2,
        ));

        let state = receiver.state();
        assert_eq!(ids(&state), vec!["e", "c"]);
        assert_eq!(state.phase, ReceiverPhase::Populated);
        assert_eq!(state.last_sequence, Some(2));
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_stale_sequence_is_still_applied() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(vec![post("a", "Keys", true, 100.0)], 5));
        receiver.apply_context(&snapshot(vec![post("b", "Phone", true, 100.0)], 3));

        let state = receiver.state();
        assert_eq!(ids(&state), vec!["b"]);
        assert_eq!(state.last_sequence, Some(3));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(
            vec![
                post("a", "Keys", true, 300.0),
                post("b", "Phone", true, 200.0),
                post("c", "Card", true, 100.0),
            ],
            1,
        ));

        let changed = post("b", "Black Phone", true, 200.0);
        let cue = receiver.apply_update(&serde_json::to_value(&changed).unwrap());
        assert_eq!(cue, Some(AlertCue::Notification));

        let state = receiver.state();
        assert_eq!(ids(&state), vec!["a", "b", "c"]);
        assert_eq!(state.lost_posts[1].item_name, "Black Phone");
    }

    #[test]
    fn test_found_post_removal() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(vec![post("a", "Keys", true, 100.0)], 1));
        let mut cues = receiver.subscribe_cues();

        let absent = RelayDelta {
            post: post("zzz", "Hat", false, 50.0),
        };
        let payload = absent.to_payload().unwrap();
        receiver.handle_event(TransportEvent::MessageReceived(payload));
        let state = receiver.state();
        assert_eq!(ids(&state), vec!["a"]);
        assert!(state.last_error.is_none());
        assert!(cues.try_recv().is_err());

        let found = post("a", "Keys", false, 100.0);
        let cue = receiver.apply_update(&serde_json::to_value(&found).unwrap());
        assert_eq!(cue, Some(AlertCue::Success));
        assert!(receiver.state().lost_posts.is_empty());
        assert_eq!(cues.try_recv().unwrap(), AlertCue::Success);
    }

    #[test]
    fn test_message_before_context_keeps_idle() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        let receiver = CompanionReceiver::new(Arc::new(companion));
        primary.activate();
        receiver.start();
        while let Ok(event) = companion_rx.try_recv() {
            receiver.handle_event(event);
        }
        assert_eq!(receiver.state().phase, ReceiverPhase::Idle);

        let found = post("a", "Keys", false, 100.0);
        assert_eq!(receiver.apply_update(&serde_json::to_value(&found).unwrap()), None);
        assert_eq!(receiver.state().phase, ReceiverPhase::Idle);

        let lost = post("b", "Phone", true, 200.0);
        let cue = receiver.apply_update(&serde_json::to_value(&lost).unwrap());
        assert_eq!(cue, Some(AlertCue::Notification));
        let state = receiver.state();
        assert_eq!(state.phase, ReceiverPhase::Idle);
        assert_eq!(ids(&state), vec!["b"]);

        receiver.apply_context(&snapshot(vec![post("c", "Card", true, 300.0)], 1));
        assert_eq!(receiver.state().phase, ReceiverPhase::Populated);
    }

    #[test]
    fn test_partial_batch_skips_bad_entries() {
        let receiver = receiver();
        let mut payload = snapshot(
            vec![
                post("a", "Keys", true, 100.0),
                post("b", "Phone", true, 200.0),
                post("c", "Card", true, 300.0),
            ],
            1,
        );
        let entries = payload
            .get_mut(KEY_ALL_POSTS)
            .and_then(Value::as_array_mut)
            .unwrap();
        entries.push(json!({ "id": "broken" }));
        entries.push(json!("not a post"));

        receiver.apply_context(&payload);

        let state = receiver.state();
        assert_eq!(state.lost_posts.len(), 3);
        assert!(state.lost_posts.iter().all(Post::is_lost));
        assert!(state.last_error.as_deref().unwrap().contains('2'));
    }

    #[test]
    fn test_missing_post_list_keeps_current() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(vec![post("a", "Keys", true, 100.0)], 1));

        let mut payload = Payload::new();
        payload.insert(KEY_ALL_POSTS.to_string(), json!("nope"));
        receiver.apply_context(&payload);

        let state = receiver.state();
        assert_eq!(ids(&state), vec!["a"]);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn test_undecodable_update_keeps_list() {
        let receiver = receiver();
        receiver.apply_context(&snapshot(vec![post("a", "Keys", true, 100.0)], 1));

        assert_eq!(receiver.apply_update(&json!({ "id": "x" })), None);
        let state = receiver.state();
        assert_eq!(ids(&state), vec!["a"]);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn test_refresh_while_unreachable_sets_error() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        let receiver = CompanionReceiver::new(Arc::new(companion));
        primary.activate();
        receiver.start();
        while let Ok(event) = companion_rx.try_recv() {
            receiver.handle_event(event);
        }
        receiver.apply_context(&snapshot(vec![post("a", "Keys", true, 100.0)], 1));

        primary.set_reachable(false);
        while let Ok(event) = companion_rx.try_recv() {
            receiver.handle_event(event);
        }

        let err = receiver.request_refresh().unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        let state = receiver.state();
        assert_eq!(state.last_error.as_deref(), Some(UNREACHABLE_MESSAGE));
        assert_eq!(ids(&state), vec!["a"]);
    }

    #[test]
    fn test_activation_applies_pending_context_and_requests_refresh() {
        let ((primary, mut primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        let _ = primary_rx.try_recv();
        primary
            .update_context(snapshot(vec![post("a", "Keys", true, 100.0)], 1))
            .unwrap();

        let receiver = CompanionReceiver::new(Arc::new(companion));
        assert_eq!(receiver.state().phase, ReceiverPhase::Uninitialized);
        receiver.start();
        assert_eq!(receiver.state().phase, ReceiverPhase::Activating);
        while let Ok(event) = companion_rx.try_recv() {
            receiver.handle_event(event);
        }

        let state = receiver.state();
        assert_eq!(state.phase, ReceiverPhase::Populated);
        assert_eq!(ids(&state), vec!["a"]);

        let mut saw_refresh = false;
        while let Ok(event) = primary_rx.try_recv() {
            if let TransportEvent::MessageReceived(message) = event {
                saw_refresh |= RelayMessage::classify(&message) == RelayMessage::RefreshRequest;
            }
        }
        assert!(saw_refresh);
    }
}
