//! HTTP transport: the paired device is another instance of this service.
//!
//! Outbound traffic goes through `reqwest` to `{peer}/relay/*`; inbound
//! traffic arrives on the routes built by [`router`]. Reachability is the
//! result of periodic `GET {peer}/health` probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use axum::{extract::State, middleware, routing::post, Json, Router};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};

use super::memory::EventStream;
use super::transport::{ActivationState, RelayTransport, TransportEvent};
use crate::api::{error, success, ApiResult};
use crate::auth::{self, API_KEY_HEADER};
use crate::errors::AppError;
use crate::models::Payload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay endpoints have no store revision to report.
const RELAY_REVISION: i64 = 0;

struct Shared {
    client: reqwest::Client,
    peer_url: Option<String>,
    peer_psk: Option<String>,
    probe_interval: Duration,
    activation: Mutex<ActivationState>,
    reachable: AtomicBool,
    received_context: Mutex<Option<Payload>>,
    /// Latest context waiting to be delivered; older ones are overwritten.
    outgoing_context: watch::Sender<Option<Payload>>,
    became_reachable: Notify,
    runtime: OnceLock<Handle>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn activation(&self) -> ActivationState {
        *self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_activation(&self, state: ActivationState) {
        *self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn set_reachable(&self, reachable: bool) {
        if self.reachable.swap(reachable, Ordering::SeqCst) != reachable {
            tracing::info!(reachable, "Peer reachability changed");
            if reachable {
                self.became_reachable.notify_one();
            }
            self.emit(TransportEvent::ReachabilityChanged(reachable));
        }
    }

    fn endpoint(&self, path: &str) -> Option<String> {
        self.peer_url.as_ref().map(|base| format!("{}{}", base, path))
    }

    async fn post_payload(&self, path: &str, payload: &Payload) -> Result<(), AppError> {
        let url = self
            .endpoint(path)
            .ok_or_else(|| AppError::Transport("No peer configured".to_string()))?;

        let mut request = self.client.post(&url).json(payload);
        if let Some(psk) = &self.peer_psk {
            request = request.header(API_KEY_HEADER, psk);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "Peer rejected {} with status {}",
                path,
                response.status()
            )));
        }
        Ok(())
    }

    async fn probe(&self) -> bool {
        let Some(url) = self.endpoint("/health") else {
            return false;
        };
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

/// Transport talking to a peer over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    shared: Arc<Shared>,
}

impl HttpTransport {
    pub fn new(
        peer_url: Option<String>,
        peer_psk: Option<String>,
        probe_interval: Duration,
    ) -> Result<(Self, EventStream), AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, event_stream) = mpsc::unbounded_channel();
        let (outgoing_context, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            client,
            peer_url,
            peer_psk,
            probe_interval,
            activation: Mutex::new(ActivationState::NotActivated),
            reachable: AtomicBool::new(false),
            received_context: Mutex::new(None),
            outgoing_context,
            became_reachable: Notify::new(),
            runtime: OnceLock::new(),
            events,
        });

        Ok((Self { shared }, event_stream))
    }

    /// Inbound relay routes, guarded by `psk`.
    pub fn router(&self, psk: Option<String>) -> Router {
        Router::new()
            .route("/relay/context", post(receive_context))
            .route("/relay/message", post(receive_message))
            .layer(middleware::from_fn(move |req, next| {
                auth::psk_auth_layer(psk.clone(), req, next)
            }))
            .with_state(self.clone())
    }
}

async fn probe_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.probe_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let reachable = shared.probe().await;
        shared.set_reachable(reachable);
    }
}

async fn context_delivery_loop(shared: Arc<Shared>) {
    let mut pending = shared.outgoing_context.subscribe();
    loop {
        if pending.changed().await.is_err() {
            return;
        }

        loop {
            let latest = pending.borrow_and_update().clone();
            let Some(context) = latest else {
                break;
            };

            if !shared.reachable.load(Ordering::SeqCst) {
                tracing::debug!("Peer unreachable; holding context until it returns");
                shared.became_reachable.notified().await;
                continue;
            }

            match shared.post_payload("/relay/context", &context).await {
                Ok(()) => {
                    tracing::debug!("Delivered context to peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Context delivery failed, will retry: {}", e);
                    // Retried with the newest context once the peer is back.
                    shared.set_reachable(false);
                }
            }
        }
    }
}

impl RelayTransport for HttpTransport {
    fn activate(&self) {
        let shared = &self.shared;
        if shared.activation() != ActivationState::NotActivated {
            return;
        }
        shared.set_activation(ActivationState::Activating);

        if shared.peer_url.is_none() {
            shared.set_activation(ActivationState::NotActivated);
            shared.emit(TransportEvent::Activated {
                error: Some("No peer URL configured".to_string()),
            });
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            shared.set_activation(ActivationState::NotActivated);
            shared.emit(TransportEvent::Activated {
                error: Some("No async runtime available".to_string()),
            });
            return;
        };

        runtime.spawn(probe_loop(shared.clone()));
        runtime.spawn(context_delivery_loop(shared.clone()));
        let _ = shared.runtime.set(runtime);

        shared.set_activation(ActivationState::Activated);
        tracing::info!(peer = ?shared.peer_url, "HTTP relay session activated");
        shared.emit(TransportEvent::Activated { error: None });
    }

    fn activation_state(&self) -> ActivationState {
        self.shared.activation()
    }

    fn is_reachable(&self) -> bool {
        self.is_activated() && self.shared.reachable.load(Ordering::SeqCst)
    }

    fn received_context(&self) -> Option<Payload> {
        self.shared
            .received_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send_message(&self, message: Payload) -> Result<(), AppError> {
        if !self.is_activated() {
            return Err(AppError::Transport("Session not activated".to_string()));
        }
        if !self.is_reachable() {
            return Err(AppError::Transport("Peer not reachable".to_string()));
        }
        let runtime = self
            .shared
            .runtime
            .get()
            .ok_or_else(|| AppError::Transport("Session not activated".to_string()))?;

        let shared = self.shared.clone();
        runtime.spawn(async move {
            if let Err(e) = shared.post_payload("/relay/message", &message).await {
                tracing::warn!("Message delivery failed: {}", e);
                shared.emit(TransportEvent::DeliveryFailed(e.message()));
            }
        });
        Ok(())
    }

    fn update_context(&self, context: Payload) -> Result<(), AppError> {
        if !self.is_activated() {
            return Err(AppError::Transport("Session not activated".to_string()));
        }
        self.shared.outgoing_context.send_replace(Some(context));
        Ok(())
    }
}

/// POST /relay/context - The peer replaced our application context.
async fn receive_context(
    State(transport): State<HttpTransport>,
    Json(context): Json<Payload>,
) -> ApiResult<()> {
    *transport
        .shared
        .received_context
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(context.clone());

    // Before activation the owner reads it through `received_context`.
    if transport.is_activated() {
        transport.shared.emit(TransportEvent::ContextReceived(context));
    }
    success((), RELAY_REVISION)
}

/// POST /relay/message - A direct message from the peer.
async fn receive_message(
    State(transport): State<HttpTransport>,
    Json(message): Json<Payload>,
) -> ApiResult<()> {
    if !transport.is_activated() {
        return error(
            AppError::Transport("Session not activated".to_string()),
            RELAY_REVISION,
        );
    }
    transport.shared.emit(TransportEvent::MessageReceived(message));
    success((), RELAY_REVISION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    // Nothing listens on the discard port, so probes fail fast.
    const DEAD_PEER: &str = "http://127.0.0.1:9";

    fn transport() -> (HttpTransport, EventStream) {
        HttpTransport::new(
            Some(DEAD_PEER.to_string()),
            None,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_context_before_activation_is_stored_silently() {
        let (transport, mut events) = transport();
        let response = transport
            .router(None)
            .oneshot(json_request("/relay/context", json!({ "allPosts": [] }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(events.try_recv().is_err());
        assert!(transport.received_context().is_some());
    }

    #[tokio::test]
    async fn test_inbound_events_after_activation() {
        let (transport, mut events) = transport();
        transport.activate();
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Activated { error: None }
        );

        let message = json!({ "request": "refreshPosts" });
        let response = transport
            .router(None)
            .oneshot(json_request("/relay/message", message.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        match events.recv().await.unwrap() {
            TransportEvent::MessageReceived(payload) => {
                assert_eq!(serde_json::Value::Object(payload), message)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_before_activation_is_rejected() {
        let (transport, _events) = transport();
        let response = transport
            .router(None)
            .oneshot(json_request("/relay/message", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_inbound_routes_require_key() {
        let (transport, _events) = transport();
        let router = transport.router(Some("secret".to_string()));

        let response = router
            .clone()
            .oneshot(json_request("/relay/context", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(json_request("/relay/context", json!({}), Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sends_fail_without_reachable_peer() {
        let (transport, _events) = transport();
        assert!(transport.update_context(Payload::new()).is_err());

        transport.activate();
        assert!(transport.update_context(Payload::new()).is_ok());
        assert!(matches!(
            transport.send_message(Payload::new()),
            Err(AppError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_activation_without_peer_reports_error() {
        let (transport, mut events) =
            HttpTransport::new(None, None, Duration::from_secs(60)).unwrap();
        transport.activate();
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Activated { error: Some(_) }
        ));
        assert!(!transport.is_activated());
    }
}
