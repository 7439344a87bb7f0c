//! Lost & Found Board
//!
//! A lost-and-found board service with SQLite persistence, Tantivy search and
//! a relay that mirrors lost-item alerts to a paired companion device.

mod api;
mod auth;
mod config;
mod controllers;
mod db;
mod errors;
mod models;
mod relay;
mod search;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::AuthService;
use config::{Config, Role};
use controllers::{AuthController, CommentController, PostController, UserController};
use db::Repository;
use relay::{Broadcaster, CompanionReceiver, HttpTransport, RelayTransport};
use search::SearchIndex;

/// Application state shared across all primary-role handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
    pub auth: Arc<AuthController>,
    pub users: Arc<UserController>,
    pub posts: Arc<PostController>,
    pub comments: Arc<CommentController>,
}

/// State of the companion role.
#[derive(Clone)]
pub struct CompanionState {
    pub receiver: Arc<CompanionReceiver>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lost & Found board ({} role)", config.role.as_str());
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (LOSTFOUND_API_PSK). Authentication is disabled!");
    }

    let (transport, events) = HttpTransport::new(
        config.peer_url.clone(),
        config.peer_psk.clone(),
        config.probe_interval,
    )?;
    let relay_routes = transport.router(config.api_psk.clone());

    let app = match config.role {
        Role::Primary => {
            tracing::info!("Database path: {:?}", config.db_path);
            tracing::info!("Index path: {:?}", config.index_path);

            // Initialize database
            let pool = db::init_database(&config.db_path).await?;
            let repo = Arc::new(Repository::new(pool));

            // Initialize search index
            let search = Arc::new(SearchIndex::open(&config.index_path)?);

            let auth = Arc::new(AuthService::new(repo.clone()));
            let broadcaster = Arc::new(Broadcaster::new(Arc::new(transport.clone())));
            let posts = Arc::new(PostController::new(
                repo.clone(),
                auth.clone(),
                search,
                broadcaster,
            ));

            // Build initial search index from database
            tracing::info!("Building search index...");
            let indexed = posts.rebuild_index().await?;
            tracing::info!("Search index built with {} posts", indexed);

            let relay_posts = posts.clone();
            tokio::spawn(async move { relay_posts.run_relay(events).await });
            let observed_posts = posts.clone();
            tokio::spawn(async move { observed_posts.observe_changes().await });

            if config.peer_url.is_some() {
                transport.activate();
            } else {
                tracing::info!("No peer configured (LOSTFOUND_PEER_URL); companion relay disabled");
            }

            let state = AppState {
                config: Arc::new(config.clone()),
                auth: Arc::new(AuthController::new(auth.clone(), repo.clone())),
                users: Arc::new(UserController::new(auth.clone(), repo.clone())),
                comments: Arc::new(CommentController::new(auth, repo.clone())),
                posts,
                repo,
            };
            create_router(state, relay_routes)
        }
        Role::Companion => {
            let receiver = Arc::new(CompanionReceiver::new(Arc::new(transport)));

            let relay_receiver = receiver.clone();
            tokio::spawn(async move { relay_receiver.run(events).await });

            let mut cues = receiver.subscribe_cues();
            tokio::spawn(async move {
                while let Ok(cue) = cues.recv().await {
                    tracing::info!(?cue, "Alert");
                }
            });
            receiver.start();

            let state = CompanionState {
                receiver,
                config: Arc::new(config.clone()),
            };
            create_companion_router(state, relay_routes)
        }
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the primary router with all routes.
pub fn create_router(state: AppState, relay_routes: Router) -> Router {
    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Auth
        .route("/auth/signup", post(api::sign_up))
        .route("/auth/signin", post(api::sign_in))
        .route("/auth/signout", post(api::sign_out))
        .route("/auth/session", get(api::get_session))
        // Profile
        .route("/me", get(api::get_profile).put(api::update_profile))
        // Posts
        .route("/posts", get(api::list_posts).post(api::create_post))
        .route("/posts/mine", get(api::list_my_posts))
        .route(
            "/posts/{id}",
            get(api::get_post)
                .put(api::update_post)
                .delete(api::delete_post),
        )
        // Comments
        .route(
            "/posts/{id}/comments",
            get(api::list_comments).post(api::create_comment),
        )
        // Search
        .route("/search", get(api::search_posts))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(relay_routes)
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

/// Create the companion router: alerts plus the inbound relay routes.
pub fn create_companion_router(state: CompanionState, relay_routes: Router) -> Router {
    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route("/alerts", get(api::get_alerts))
        .route("/alerts/refresh", post(api::refresh_alerts))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .with_state(state)
        .merge(relay_routes)
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
