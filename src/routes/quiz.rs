use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};

use crate::{
    dto::{
        common::{JoinResponse, SessionCreatedResponse},
        quiz::{
            AdvanceRequest, AnswerResponse, CountdownQuery, CreateQuizRequest,
            QuestionStartedResponse, SubmitAnswerRequest,
        },
    },
    error::AppError,
    routes::auth::Authenticated,
    services::quiz_service,
    state::{
        SharedState,
        quiz::{AnswerProgress, Countdown, LeaderboardEntry, QuizDocument},
    },
};

/// Quiz lifecycle: creation, membership, host commands and answers.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/quiz", post(create_quiz))
        .route("/quiz/{id}", get(get_quiz))
        .route("/quiz/{id}/join", post(join_quiz))
        .route("/quiz/{id}/advance", post(advance_question))
        .route("/quiz/{id}/answers", post(submit_answer))
        .route("/quiz/{id}/results", post(show_results))
        .route("/quiz/{id}/next", post(next_question))
        .route("/quiz/{id}/finish", post(finish_quiz))
        .route("/quiz/{id}/leaderboard", post(recompute_leaderboard))
        .route("/quiz/{id}/progress", get(answer_progress))
        .route("/quiz/{id}/countdown", get(countdown))
}

#[utoipa::path(
    post,
    path = "/quiz",
    tag = "quiz",
    params(("Authorization" = String, Header, description = "Bearer identity token of the host")),
    request_body = CreateQuizRequest,
    responses(
        (status = 200, description = "Quiz created", body = SessionCreatedResponse),
        (status = 400, description = "Invalid questions")
    )
)]
/// Create a quiz owned by the caller and reserve its join code.
pub async fn create_quiz(
    State(state): State<SharedState>,
    Authenticated(host): Authenticated,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    Ok(Json(quiz_service::create_quiz(&state, &host, payload).await?))
}

#[utoipa::path(
    get,
    path = "/quiz/{id}",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    responses(
        (status = 200, description = "Quiz as the caller may see it", body = QuizDocument),
        (status = 404, description = "Unknown quiz")
    )
)]
/// Return the quiz; players do not see the live question's answers.
pub async fn get_quiz(
    State(state): State<SharedState>,
    Authenticated(viewer): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<QuizDocument>, AppError> {
    Ok(Json(quiz_service::view_quiz(&state, &id, &viewer).await?))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/join",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    responses(
        (status = 200, description = "Caller is a player", body = JoinResponse),
        (status = 409, description = "Quiz already finished")
    )
)]
/// Join the quiz as a player.
pub async fn join_quiz(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(quiz_service::join(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/advance",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    request_body = AdvanceRequest,
    responses(
        (status = 200, description = "Question is live", body = QuestionStartedResponse),
        (status = 403, description = "Caller is not the host"),
        (status = 409, description = "Question index out of sequence")
    )
)]
/// Put the given question live (host only).
pub async fn advance_question(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<QuestionStartedResponse>, AppError> {
    Ok(Json(
        quiz_service::advance(&state, &id, &principal, payload.question_index).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/answers",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = AnswerResponse),
        (status = 409, description = "Question closed or already answered")
    )
)]
/// Answer the live question once.
pub async fn submit_answer(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    Ok(Json(
        quiz_service::submit_answer(&state, &id, &principal, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/results",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses(
        (status = 200, description = "Question in review", body = QuizDocument),
        (status = 409, description = "No live question")
    )
)]
/// Close the live question and reveal its answer (host only).
pub async fn show_results(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<QuizDocument>, AppError> {
    Ok(Json(quiz_service::show_results(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/next",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses(
        (status = 200, description = "Next question live, or the quiz finished after the last one", body = QuizDocument),
        (status = 409, description = "Results not shown yet")
    )
)]
/// Leave the review of the current question (host only).
pub async fn next_question(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<QuizDocument>, AppError> {
    Ok(Json(quiz_service::next(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/finish",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses(
        (status = 200, description = "Quiz finished", body = QuizDocument),
        (status = 409, description = "Quiz already finished")
    )
)]
/// End the quiz early (host only).
pub async fn finish_quiz(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<QuizDocument>, AppError> {
    Ok(Json(quiz_service::finish(&state, &id, &principal).await?))
}

#[utoipa::path(
    post,
    path = "/quiz/{id}/leaderboard",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Leaderboard rebuilt from the stored scores", body = [LeaderboardEntry]))
)]
/// Rebuild the leaderboard (host only).
pub async fn recompute_leaderboard(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(
        quiz_service::recompute_leaderboard(&state, &id, &principal).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/quiz/{id}/progress",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("Authorization" = String, Header, description = "Bearer identity token of the host")
    ),
    responses((status = 200, description = "Answers received for the live question", body = AnswerProgress))
)]
/// How many connected players answered the live question (host only).
pub async fn answer_progress(
    State(state): State<SharedState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<AnswerProgress>, AppError> {
    Ok(Json(
        quiz_service::answer_progress(&state, &id, &principal).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/quiz/{id}/countdown",
    tag = "quiz",
    params(
        ("id" = String, Path, description = "Quiz identifier"),
        ("first" = Option<bool>, Query, description = "Set on the first observation of the question")
    ),
    responses(
        (status = 200, description = "Remaining time of the live question", body = Countdown),
        (status = 409, description = "No question started yet")
    )
)]
/// Remaining time of the live question, derived from the server start time.
pub async fn countdown(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<CountdownQuery>,
) -> Result<Json<Countdown>, AppError> {
    Ok(Json(quiz_service::countdown(&state, &id, query.first).await?))
}
