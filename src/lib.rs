pub mod auth;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod redis;
pub mod services;
pub mod store;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::IdentityProvider, clock::Clock, config::Config, redis::RedisClient,
    services::vote_service::VoteLedger, store::DocumentStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub ledger: Arc<VoteLedger>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    /// Vote rate limiting is skipped when no Redis is configured.
    pub redis: Option<Arc<RedisClient>>,
    pub config: Arc<Config>,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid allowed origin {}", origin);
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    // Readable anonymously; a valid token adds the caller's direction
    let public_routes = Router::new()
        .route("/api/posts", get(handlers::posts::get_posts))
        .route(
            "/api/votes/{resource_type}/{resource_id}",
            get(handlers::votes::get_vote_state),
        )
        .route(
            "/api/votes/batch",
            post(handlers::votes::get_vote_states_batch),
        );

    // Protected routes
    let protected_routes = Router::new()
        .route("/api/votes", post(handlers::votes::apply_vote))
        .route("/api/posts", post(handlers::posts::create_post))
        .route("/api/posts/{post_id}", delete(handlers::posts::delete_post))
        .route("/api/comments", post(handlers::comments::create_comment));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
