use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Live Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::resolve_code,
        crate::routes::public::get_archive,
        crate::routes::sse::session_stream,
        crate::routes::quiz::create_quiz,
        crate::routes::quiz::get_quiz,
        crate::routes::quiz::join_quiz,
        crate::routes::quiz::advance_question,
        crate::routes::quiz::submit_answer,
        crate::routes::quiz::show_results,
        crate::routes::quiz::next_question,
        crate::routes::quiz::finish_quiz,
        crate::routes::quiz::recompute_leaderboard,
        crate::routes::quiz::answer_progress,
        crate::routes::quiz::countdown,
        crate::routes::tournament::create_tournament,
        crate::routes::tournament::get_tournament,
        crate::routes::tournament::join_tournament,
        crate::routes::tournament::start_tournament,
        crate::routes::tournament::activate_match,
        crate::routes::tournament::complete_match,
        crate::routes::tournament::vote,
        crate::routes::tournament::finish_tournament,
        crate::routes::tournament::post_message,
        crate::routes::chat_poll::create_poll,
        crate::routes::chat_poll::get_poll,
        crate::routes::chat_poll::join_poll,
        crate::routes::chat_poll::start_poll,
        crate::routes::chat_poll::vote,
        crate::routes::chat_poll::post_message,
        crate::routes::chat_poll::close_poll,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::common::SessionCreatedResponse,
            crate::dto::common::JoinCodeResponse,
            crate::dto::common::JoinResponse,
            crate::dto::quiz::CreateQuizRequest,
            crate::dto::quiz::QuestionInput,
            crate::dto::quiz::AdvanceRequest,
            crate::dto::quiz::SubmitAnswerRequest,
            crate::dto::quiz::AnswerResponse,
            crate::dto::quiz::QuestionStartedResponse,
            crate::dto::tournament::CreateTournamentRequest,
            crate::dto::tournament::ContestantInput,
            crate::dto::tournament::VoteRequest,
            crate::dto::tournament::VoteResponse,
            crate::dto::tournament::MatchResultResponse,
            crate::dto::tournament::MatchPointer,
            crate::dto::chat_poll::CreateChatPollRequest,
            crate::dto::chat_poll::ChatMessageRequest,
            crate::dao::models::SessionKind,
            crate::dao::models::ArchiveSummary,
            crate::dao::models::ArchivedPlayer,
            crate::dao::models::AggregateStats,
            crate::state::state_machine::QuizStatus,
            crate::state::state_machine::PollStatus,
            crate::state::state_machine::FinishReason,
            crate::state::quiz::QuizDocument,
            crate::state::quiz::GameMode,
            crate::state::quiz::PublicQuestion,
            crate::state::quiz::PlayerRecord,
            crate::state::quiz::AnswerRecord,
            crate::state::quiz::LeaderboardEntry,
            crate::state::quiz::QuestionWinner,
            crate::state::quiz::AnswerProgress,
            crate::state::quiz::Countdown,
            crate::state::bracket::TournamentDocument,
            crate::state::bracket::Bracket,
            crate::state::bracket::Match,
            crate::state::bracket::MatchStatus,
            crate::state::bracket::Contestant,
            crate::state::chat::ChatPollDocument,
            crate::state::chat::ChatMessage,
            crate::state::chat::MessageKind,
            crate::state::chat::Participant,
            crate::state::chat::VoteRecord,
            crate::dto::sse::SessionClosed,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Join code and archive lookups"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "quiz", description = "Timed quizzes with scoring"),
        (name = "tournament", description = "Single-elimination voting brackets"),
        (name = "poll", description = "Two-option polls with chat"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_session_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/quiz/{id}/answers",
            "/tournament/{id}/rounds/{round}/matches/{index}/votes",
            "/poll/{id}/close",
            "/sse/{kind}/{id}",
            "/codes/{code}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
