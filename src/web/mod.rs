//! HTTP surface: the actor boundary (`/actors/...`) and the public routing
//! boundary (`/{operation}` and `/{operation}/{n}`).

pub mod error;
pub mod handlers;

pub use error::WebError;

use crate::actor::ActorHost;
use crate::fanout::FanOut;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<ActorHost>,
    pub fanout: Arc<FanOut>,
}

impl AppState {
    pub fn new(host: Arc<ActorHost>, fanout: Arc<FanOut>) -> Self {
        Self { host, fanout }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/actors/:name",
            post(handlers::actor_request).fallback(handlers::not_found),
        )
        .route(
            "/actors/:name/hang",
            post(handlers::actor_hang).fallback(handlers::not_found),
        )
        .route(
            "/:operation",
            get(handlers::single)
                .post(handlers::single)
                .fallback(handlers::not_found),
        )
        .route(
            "/:operation/:n",
            get(handlers::fan_out)
                .post(handlers::fan_out)
                .fallback(handlers::not_found),
        )
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
