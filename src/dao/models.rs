use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kinds of live session a join code can point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Quiz,
    Tournament,
    Poll,
}

impl SessionKind {
    /// Collection holding live sessions of this kind.
    pub fn collection(self) -> &'static str {
        match self {
            SessionKind::Quiz => super::layout::QUIZZES,
            SessionKind::Tournament => super::layout::TOURNAMENTS,
            SessionKind::Poll => super::layout::CHAT_POLLS,
        }
    }
}

/// Stored under `codes/{code}` while the session it names is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReservation {
    pub kind: SessionKind,
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub reserved_at: i64,
}

/// Immutable record written when a quiz finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub session_id: String,
    pub title: String,
    pub host_id: String,
    pub mode: String,
    pub question_count: u32,
    pub created_at: i64,
    pub finished_at: i64,
    pub finish_reason: String,
    /// Highest ranked player, absent when nobody joined.
    pub winner: Option<ArchivedPlayer>,
    pub top_three: Vec<ArchivedPlayer>,
    /// Every player, best rank first.
    pub players: Vec<ArchivedPlayer>,
    pub stats: AggregateStats,
}

/// Final standing and per-player statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedPlayer {
    pub user_id: String,
    pub display_name: String,
    pub rank: u32,
    pub score: i64,
    pub correct_count: u32,
    pub answered_count: u32,
    /// Mean of the recorded time spent over answered questions, in seconds.
    pub average_time_spent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub player_count: u32,
    pub average_score: f64,
    pub average_correct: f64,
    pub high_score: i64,
    pub low_score: i64,
}
