/// Final results of finished quizzes.
pub mod archive;
/// Two-option polls with a live chat.
pub mod chat_poll_service;
/// Code release and delayed purge of finished sessions.
pub mod cleanup;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Signed identity tokens and host checks.
pub mod identity;
/// Six-digit join code reservation.
pub mod join_code;
pub(crate) mod poll_session;
/// Connected flags of session members.
pub mod presence;
/// Read-only lookups by join code or session id.
pub mod public_service;
/// Quiz lifecycle, answers and leaderboards.
pub mod quiz_service;
/// Automatic review of live questions.
pub mod review_watcher;
/// Points awarded for an answer.
pub mod scoring;
/// Storage backend connection supervisor.
pub mod storage_supervisor;
/// Live session documents over SSE.
pub mod subscription_service;
/// Single-elimination voting tournaments.
pub mod tournament_service;
