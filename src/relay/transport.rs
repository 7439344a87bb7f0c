//! Transport seam between a primary device and its companion.

use crate::errors::AppError;
use crate::models::Payload;

/// Session activation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    NotActivated,
    Activating,
    Activated,
}

/// Inbound activity reported by a transport. The owner drains these on a
/// single task, which is the only place relay-derived state is mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Activation finished; `error` is set when it failed.
    Activated { error: Option<String> },
    ReachabilityChanged(bool),
    /// The peer replaced our application context.
    ContextReceived(Payload),
    /// The peer sent a direct message.
    MessageReceived(Payload),
    /// A send accepted earlier failed asynchronously.
    DeliveryFailed(String),
}

/// A paired-device session.
///
/// Neither send primitive blocks: `send_message` is immediate and
/// at-most-once (it fails rather than queueing when the peer is not
/// reachable) while `update_context` is durable and coalescing (only the
/// latest context is guaranteed to reach the peer).
pub trait RelayTransport: Send + Sync {
    fn activate(&self);

    fn activation_state(&self) -> ActivationState;

    fn is_reachable(&self) -> bool;

    /// The most recent context the peer delivered to this side, if any.
    fn received_context(&self) -> Option<Payload>;

    fn send_message(&self, message: Payload) -> Result<(), AppError>;

    fn update_context(&self, context: Payload) -> Result<(), AppError>;

    fn is_activated(&self) -> bool {
        self.activation_state() == ActivationState::Activated
    }
}
