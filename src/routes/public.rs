use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dao::models::ArchiveSummary,
    dto::common::JoinCodeResponse,
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Unauthenticated lookups: join codes and quiz archives.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/codes/{code}", get(resolve_code))
        .route("/archives/{id}", get(get_archive))
}

#[utoipa::path(
    get,
    path = "/codes/{code}",
    tag = "public",
    params(("code" = String, Path, description = "Six-digit join code")),
    responses(
        (status = 200, description = "Session designated by the code", body = JoinCodeResponse),
        (status = 400, description = "Malformed code"),
        (status = 404, description = "No active session uses this code")
    )
)]
/// Resolve a join code to the session it designates.
pub async fn resolve_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<JoinCodeResponse>, AppError> {
    let payload = public_service::resolve_code(&state, &code).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/archives/{id}",
    tag = "public",
    params(("id" = String, Path, description = "Identifier of a finished quiz")),
    responses(
        (status = 200, description = "Archived results", body = ArchiveSummary),
        (status = 404, description = "No archive for this quiz")
    )
)]
/// Return the results archived when a quiz finished.
pub async fn get_archive(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ArchiveSummary>, AppError> {
    let payload = public_service::get_archive(&state, &id).await?;
    Ok(Json(payload))
}
