use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::{
        chat_poll::ChatMessageRequest,
        common::{JoinResponse, SessionCreatedResponse},
        tournament::{
            CreateTournamentRequest, MatchPointer, MatchResultResponse, VoteRequest, VoteResponse,
        },
    },
    error::AppError,
    routes::auth::Authenticated,
    services::tournament_service,
    state::{SharedState, bracket::TournamentDocument, chat::ChatMessage},
};

/// Bracket tournaments: creation, host commands, votes and chat.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/tournament", post(create_tournament))
        .route("/tournament/{id}", get(get_tournament))
        .route("/tournament/{id}/join", post(join_tournament))
        .route("/tournament/{id}/start", post(start_tournament))
        .route("/tournament/{id}/matches/activate", post(activate_match))
        .route("/tournament/{id}/matches/complete", post(complete_match))
        .route(
            "/tournament/{id}/rounds/{round}/matches/{index}/votes",
            post(vote),
        )
        .route("/tournament/{id}/finish", post(finish_tournament))
        .route("/tournament/{id}/messages", post(post_message))
}

#[utoipa::path(
    post,
    path = "/tournament",
    tag = "tournament",
    params(("Authorization" = String, Header, description = "Bearer identity token of the host")),
    request_body = CreateTournamentRequest,
    responses(
        (status = 200, description = "Tournament created with its first round", body = SessionCreatedResponse),
        (status = 400, description = "Fewer than two contestants")
    )
)]
/// Create a tournament; contestants are shuffled and paired into round one.
pub async fn create_tournament(
    State(state): State<SharedState>,
    Authenticated(host): Authenticated,
    Json(payload): Json<CreateTournamentRequest>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    Ok(Json(
        tournament_service::create_tournament(&state, &host, payload).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/tournament/{id}",
    tag = "tournament",
    params(("id" = String, Path, description = "Tournament identifier")),
    responses(
        (status = 200, description = "Tournament document", body = TournamentDocument),
        (status = 404, description = "Unknown tournament")
    )
)]
/// Return the tournament with its bracket and chat log.
pub async fn get_tournament(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TournamentDocument>, AppError> {
    Ok(Json(tournament_service::get_tournament(&state, &id).await?))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/join",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    responses((status = 200, description = "Caller is a participant", body = JoinResponse))
)]
/// Join the tournament as a voter.
pub async fn join_tournament(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(tournament_service::join(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/start",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Tournament active", body = TournamentDocument))
)]
/// Open the tournament (host only).
pub async fn start_tournament(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<TournamentDocument>, AppError> {
    Ok(Json(tournament_service::start(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/matches/activate",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses(
        (status = 200, description = "Current match accepts votes", body = MatchPointer),
        (status = 409, description = "Match already active or completed")
    )
)]
/// Let the current match accept votes (host only).
pub async fn activate_match(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<MatchPointer>, AppError> {
    Ok(Json(
        tournament_service::activate_match(&state, &id, &principal).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/matches/complete",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses(
        (status = 200, description = "Match decided and bracket advanced", body = MatchResultResponse),
        (status = 409, description = "Match not active")
    )
)]
/// Decide the current match and move the bracket on (host only).
pub async fn complete_match(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<MatchResultResponse>, AppError> {
    Ok(Json(
        tournament_service::complete_match(&state, &id, &principal).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/rounds/{round}/matches/{index}/votes",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("round" = u32, Path, description = "Round number, starting at 1"),
        ("index" = u32, Path, description = "Match index within the round"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote counted", body = VoteResponse),
        (status = 404, description = "Unknown match"),
        (status = 409, description = "Match not active or already voted")
    )
)]
/// Vote once on an active match.
pub async fn vote(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path((id, round, index)): Path<(String, u32, u32)>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, AppError> {
    Ok(Json(
        tournament_service::vote(&state, &id, &principal, round, index, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/finish",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Tournament ended", body = TournamentDocument))
)]
/// End the tournament early (host only).
pub async fn finish_tournament(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<TournamentDocument>, AppError> {
    Ok(Json(tournament_service::finish(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/tournament/{id}/messages",
    tag = "tournament",
    params(
        ("id" = String, Path, description = "Tournament identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    request_body = ChatMessageRequest,
    responses(
        (status = 200, description = "Message appended", body = ChatMessage),
        (status = 400, description = "Empty or too long")
    )
)]
/// Post a chat line to the tournament.
pub async fn post_message(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    Ok(Json(
        tournament_service::post_message(&state, &id, &principal, payload).await?,
    ))
}
