use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{
    dao::models::SessionKind,
    error::AppError,
    routes::auth::Authenticated,
    services::subscription_service::{self, Viewer},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/{kind}/{id}",
    tag = "sse",
    params(
        ("kind" = SessionKind, Path, description = "Kind of session to watch"),
        ("id" = String, Path, description = "Session identifier"),
        ("token" = Option<String>, Query, description = "Identity token, for clients that cannot send an Authorization header")
    ),
    responses(
        (status = 200, description = "Session snapshots, then a closing event", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or invalid identity token"),
        (status = 404, description = "Unknown session")
    )
)]
/// Stream the session document; the caller counts as connected while the stream is open.
pub async fn session_stream(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path((kind, id)): Path<(SessionKind, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let viewer = Viewer {
        kind,
        session_id: id,
        principal,
    };
    Ok(subscription_service::open(&state, viewer).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/{kind}/{id}", get(session_stream))
}
