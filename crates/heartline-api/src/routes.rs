use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{clear_all, gratitude, messages, profile};

/// REST routes. The WebSocket gateway is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/me", get(profile::me))
        .route("/me/profile", put(profile::update_profile))
        .route("/partner", get(profile::partner))
        .route("/messages", post(messages::send_message))
        .route("/messages/inbox", get(messages::inbox))
        .route("/messages/outbox", get(messages::outbox))
        .route("/messages/history", get(messages::history))
        .route("/messages/{id}", delete(messages::delete_message))
        .route("/messages/{id}/responses", post(messages::respond))
        .route("/messages/{id}/resolve", post(messages::resolve))
        .route("/clear-all", get(clear_all::get_state))
        .route("/clear-all/request", post(clear_all::request_clear))
        .route("/clear-all/requests/{id}/respond", post(clear_all::answer_request))
        .route("/clear-all/responses/{id}/dismiss", post(clear_all::dismiss_response))
        .route("/clear-all/confirm", post(clear_all::confirm_clear))
        .route("/clear-all/cancel", post(clear_all::cancel_clear))
        .route("/gratitude", post(gratitude::send_gratitude))
        .route("/gratitude/recent", get(gratitude::recent_gratitude))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
