//! In-process paired transport.
//!
//! Both endpoints share one link whose reachability can be toggled, which
//! makes delivery behaviour deterministic for tests and single-process runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::transport::{ActivationState, RelayTransport, TransportEvent};
use crate::errors::AppError;
use crate::models::Payload;

/// Receiving half of a transport's event channel.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

struct Endpoint {
    activation: ActivationState,
    received_context: Option<Payload>,
    /// Context stored for this endpoint but not yet announced to it.
    pending_context: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Endpoint {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            activation: ActivationState::NotActivated,
            received_context: None,
            pending_context: false,
            events,
        }
    }

    fn is_activated(&self) -> bool {
        self.activation == ActivationState::Activated
    }

    fn emit(&self, event: TransportEvent) {
        // The owner may have stopped listening; nothing to do then.
        let _ = self.events.send(event);
    }
}

struct Link {
    reachable: bool,
    ends: [Endpoint; 2],
}

impl Link {
    fn peer_reachable(&self, side: usize) -> bool {
        self.reachable && self.ends[side].is_activated() && self.ends[1 - side].is_activated()
    }

    fn flush_pending(&mut self) {
        for side in 0..2 {
            let deliverable = self.reachable && self.ends[side].is_activated();
            let end = &mut self.ends[side];
            if deliverable && end.pending_context {
                end.pending_context = false;
                if let Some(context) = end.received_context.clone() {
                    end.emit(TransportEvent::ContextReceived(context));
                }
            }
        }
    }
}

/// One end of an in-process link.
#[derive(Clone)]
pub struct MemoryTransport {
    side: usize,
    link: Arc<Mutex<Link>>,
}

impl MemoryTransport {
    /// Create two connected endpoints, each with its event stream. The link
    /// starts reachable; neither end is activated.
    pub fn pair() -> ((MemoryTransport, EventStream), (MemoryTransport, EventStream)) {
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (second_tx, second_rx) = mpsc::unbounded_channel();

        let link = Arc::new(Mutex::new(Link {
            reachable: true,
            ends: [Endpoint::new(first_tx), Endpoint::new(second_tx)],
        }));

        (
            (
                MemoryTransport {
                    side: 0,
                    link: link.clone(),
                },
                first_rx,
            ),
            (MemoryTransport { side: 1, link }, second_rx),
        )
    }

    /// Connect or disconnect the link. Activated ends are told about the
    /// transition; held contexts are delivered once the link is back.
    pub fn set_reachable(&self, reachable: bool) {
        let mut link = self.lock();
        if link.reachable == reachable {
            return;
        }
        link.reachable = reachable;

        for side in 0..2 {
            if link.ends[side].is_activated() {
                let now_reachable = link.peer_reachable(side);
                link.ends[side].emit(TransportEvent::ReachabilityChanged(now_reachable));
            }
        }

        if reachable {
            link.flush_pending();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RelayTransport for MemoryTransport {
    fn activate(&self) {
        let mut link = self.lock();
        let side = self.side;
        if link.ends[side].is_activated() {
            return;
        }

        link.ends[side].activation = ActivationState::Activated;
        // A context that arrived while inactive is read via `received_context`.
        link.ends[side].pending_context = false;
        link.ends[side].emit(TransportEvent::Activated { error: None });

        if link.peer_reachable(side) {
            link.ends[1 - side].emit(TransportEvent::ReachabilityChanged(true));
        }
        link.flush_pending();
    }

    fn activation_state(&self) -> ActivationState {
        self.lock().ends[self.side].activation
    }

    fn is_reachable(&self) -> bool {
        self.lock().peer_reachable(self.side)
    }

    fn received_context(&self) -> Option<Payload> {
        self.lock().ends[self.side].received_context.clone()
    }

    fn send_message(&self, message: Payload) -> Result<(), AppError> {
        let link = self.lock();
        if !link.ends[self.side].is_activated() {
            return Err(AppError::Transport("Session not activated".to_string()));
        }
        if !link.peer_reachable(self.side) {
            return Err(AppError::Transport("Peer not reachable".to_string()));
        }

        link.ends[1 - self.side]
            .events
            .send(TransportEvent::MessageReceived(message))
            .map_err(|_| AppError::Transport("Peer session closed".to_string()))
    }

    fn update_context(&self, context: Payload) -> Result<(), AppError> {
        let mut link = self.lock();
        if !link.ends[self.side].is_activated() {
            return Err(AppError::Transport("Session not activated".to_string()));
        }

        let deliver_now = link.reachable && link.ends[1 - self.side].is_activated();
        let peer = &mut link.ends[1 - self.side];
        peer.received_context = Some(context.clone());
        if deliver_now {
            peer.pending_context = false;
            peer.emit(TransportEvent::ContextReceived(context));
        } else {
            peer.pending_context = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: i64) -> Payload {
        let mut p = Payload::new();
        p.insert("n".to_string(), json!(n));
        p
    }

    #[test]
    fn test_activation_and_reachability_events() {
        let ((primary, mut primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();

        primary.activate();
        assert_eq!(
            primary_rx.try_recv().unwrap(),
            TransportEvent::Activated { error: None }
        );
        assert!(!primary.is_reachable());

        companion.activate();
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::Activated { error: None }
        );
        assert_eq!(
            primary_rx.try_recv().unwrap(),
            TransportEvent::ReachabilityChanged(true)
        );
        assert!(primary.is_reachable() && companion.is_reachable());
    }

    #[test]
    fn test_message_to_unreachable_peer_is_dropped() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        companion.activate();
        let _ = companion_rx.try_recv();

        primary.set_reachable(false);
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::ReachabilityChanged(false)
        );

        let err = primary.send_message(payload(1)).unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));

        primary.set_reachable(true);
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::ReachabilityChanged(true)
        );
        // Not queued: nothing else arrives.
        assert!(companion_rx.try_recv().is_err());
    }

    #[test]
    fn test_context_is_coalesced_while_unreachable() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        companion.activate();
        let _ = companion_rx.try_recv();

        primary.set_reachable(false);
        let _ = companion_rx.try_recv();

        primary.update_context(payload(1)).unwrap();
        primary.update_context(payload(2)).unwrap();
        assert!(companion_rx.try_recv().is_err());

        primary.set_reachable(true);
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::ReachabilityChanged(true)
        );
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::ContextReceived(payload(2))
        );
        assert!(companion_rx.try_recv().is_err());
    }

    #[test]
    fn test_context_before_peer_activation_is_readable_after() {
        let ((primary, _primary_rx), (companion, mut companion_rx)) = MemoryTransport::pair();
        primary.activate();
        primary.update_context(payload(5)).unwrap();

        companion.activate();
        assert_eq!(
            companion_rx.try_recv().unwrap(),
            TransportEvent::Activated { error: None }
        );
        assert_eq!(companion.received_context(), Some(payload(5)));
        assert!(companion_rx.try_recv().is_err());
    }

    #[test]
    fn test_sends_require_activation() {
        let ((primary, _), (_companion, _)) = MemoryTransport::pair();
        assert!(primary.send_message(payload(1)).is_err());
        assert!(primary.update_context(payload(1)).is_err());
    }
}
