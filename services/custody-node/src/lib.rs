//! HTTP front end for the handoff custody chain.
//!
//! Authentication happens upstream; the gateway forwards the caller as
//! `x-caller-id`, `x-caller-role` and `x-caller-name` headers. Routes under
//! `/handoffs/public`, `/handoffs/confirm` and `/handoffs/dispute` are
//! authorized by the capability token alone.

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

pub use config::Config;
pub use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/handoffs",
            post(handlers::create_handoff).get(handlers::list_handoffs),
        )
        .route("/handoffs/chain/:session_id", get(handlers::get_chain))
        .route("/handoffs/public/:token", get(handlers::public_view))
        .route("/handoffs/confirm/:token", post(handlers::confirm_by_token))
        .route("/handoffs/dispute/:token", post(handlers::dispute_by_token))
        .route("/handoffs/:id", get(handlers::get_handoff))
        .route("/handoffs/:id/confirm", patch(handlers::confirm_handoff))
        .route("/handoffs/:id/dispute", patch(handlers::dispute_handoff))
        .route("/handoffs/:id/resolve", patch(handlers::resolve_handoff))
        .route("/handoffs/:id/resolve/start", patch(handlers::start_resolution))
        .route(
            "/handoffs/:id/resend-notification",
            post(handlers::resend_notification),
        )
        .route("/handoffs/:id/notifications", get(handlers::list_notifications))
        .with_state(state)
}
