use axum::Router;

use crate::state::SharedState;

pub mod auth;
pub mod chat_poll;
pub mod docs;
pub mod health;
pub mod public;
pub mod quiz;
pub mod sse;
pub mod tournament;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(public::router())
        .merge(sse::router())
        .merge(quiz::router())
        .merge(tournament::router())
        .merge(chat_poll::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
