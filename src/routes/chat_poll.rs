use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::{
        chat_poll::{ChatMessageRequest, CreateChatPollRequest},
        common::{JoinResponse, SessionCreatedResponse},
        tournament::{VoteRequest, VoteResponse},
    },
    error::AppError,
    routes::auth::Authenticated,
    services::chat_poll_service,
    state::{
        SharedState,
        chat::{ChatMessage, ChatPollDocument},
    },
};

/// Two-option polls with a live chat.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/poll", post(create_poll))
        .route("/poll/{id}", get(get_poll))
        .route("/poll/{id}/join", post(join_poll))
        .route("/poll/{id}/start", post(start_poll))
        .route("/poll/{id}/votes", post(vote))
        .route("/poll/{id}/messages", post(post_message))
        .route("/poll/{id}/close", post(close_poll))
}

#[utoipa::path(
    post,
    path = "/poll",
    tag = "poll",
    params(("Authorization" = String, Header, description = "Bearer identity token of the host")),
    request_body = CreateChatPollRequest,
    responses((status = 200, description = "Poll created", body = SessionCreatedResponse))
)]
/// Create a chat poll owned by the caller.
pub async fn create_poll(
    State(state): State<SharedState>,
    Authenticated(host): Authenticated,
    Json(payload): Json<CreateChatPollRequest>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    Ok(Json(
        chat_poll_service::create_chat_poll(&state, &host, payload).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/poll/{id}",
    tag = "poll",
    params(("id" = String, Path, description = "Poll identifier")),
    responses(
        (status = 200, description = "Poll document", body = ChatPollDocument),
        (status = 404, description = "Unknown poll")
    )
)]
/// Return the poll with its tallies and chat log.
pub async fn get_poll(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ChatPollDocument>, AppError> {
    Ok(Json(chat_poll_service::get_chat_poll(&state, &id).await?))
}

#[utoipa::path(
    post,
    path = "/poll/{id}/join",
    tag = "poll",
    params(
        ("id" = String, Path, description = "Poll identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    responses((status = 200, description = "Caller is a participant", body = JoinResponse))
)]
/// Join the poll.
pub async fn join_poll(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(chat_poll_service::join(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/poll/{id}/start",
    tag = "poll",
    params(
        ("id" = String, Path, description = "Poll identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Poll accepts votes", body = ChatPollDocument))
)]
/// Open the poll for votes (host only).
pub async fn start_poll(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ChatPollDocument>, AppError> {
    Ok(Json(chat_poll_service::start(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/poll/{id}/votes",
    tag = "poll",
    params(
        ("id" = String, Path, description = "Poll identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote counted", body = VoteResponse),
        (status = 409, description = "Poll not active or already voted")
    )
)]
/// Vote once on the poll.
pub async fn vote(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, AppError> {
    Ok(Json(
        chat_poll_service::vote(&state, &id, &principal, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/poll/{id}/messages",
    tag = "poll",
    params(
        ("id" = String, Path, description = "Poll identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    request_body = ChatMessageRequest,
    responses(
        (status = 200, description = "Message appended", body = ChatMessage),
        (status = 409, description = "Poll closed")
    )
)]
/// Post a chat line to the poll.
pub async fn post_message(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    Ok(Json(
        chat_poll_service::post_message(&state, &id, &principal, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/poll/{id}/close",
    tag = "poll",
    params(
        ("id" = String, Path, description = "Poll identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Poll closed", body = ChatPollDocument))
)]
/// Close the poll (host only).
pub async fn close_poll(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ChatPollDocument>, AppError> {
    Ok(Json(chat_poll_service::close(&state, &id, &principal).await?))
}
