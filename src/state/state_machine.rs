use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    /// Players are joining; no question is live yet.
    Waiting,
    /// The current question accepts answers.
    Playing,
    /// Answers are closed and the results of the current question are shown.
    QuestionReview,
    /// Terminal state.
    Finished,
}

/// Lifecycle shared by tournaments and chat polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Waiting,
    /// Votes (and, for tournaments, match progression) are accepted.
    Active,
    /// Terminal state.
    Finished,
}

/// Why a session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every question was played or a single champion remains.
    Completed,
    /// The host ended the session early.
    HostEnded,
}

/// Host commands driving a [`QuizStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizEvent {
    /// Put the first question live.
    Start,
    /// Close answers on the current question.
    ShowResults,
    /// Put the following question live.
    NextQuestion,
    Finish(FinishReason),
}

/// Host commands driving a [`PollStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Start,
    Finish(FinishReason),
}

/// Error returned when an event cannot be applied from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition<S: Debug, E: Debug> {
    /// State the session was in when the event was received.
    pub from: S,
    /// The rejected event.
    pub event: E,
}

impl QuizStatus {
    /// Store representation, used by batch preconditions.
    pub fn as_str(self) -> &'static str {
        match self {
            QuizStatus::Waiting => "waiting",
            QuizStatus::Playing => "playing",
            QuizStatus::QuestionReview => "question_review",
            QuizStatus::Finished => "finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == QuizStatus::Finished
    }

    /// Compute the state reached by applying `event`.
    ///
    /// Whether a next question exists is checked by the caller; this only
    /// encodes which commands are legal from which state.
    pub fn next(self, event: QuizEvent) -> Result<QuizStatus, InvalidTransition<QuizStatus, QuizEvent>> {
        let next = match (self, event) {
            (QuizStatus::Waiting, QuizEvent::Start) => QuizStatus::Playing,
            (QuizStatus::Playing, QuizEvent::ShowResults) => QuizStatus::QuestionReview,
            (QuizStatus::QuestionReview, QuizEvent::NextQuestion) => QuizStatus::Playing,
            (QuizStatus::QuestionReview, QuizEvent::Finish(FinishReason::Completed)) => {
                QuizStatus::Finished
            }
            (from, QuizEvent::Finish(FinishReason::HostEnded)) if !from.is_terminal() => {
                QuizStatus::Finished
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::Waiting => "waiting",
            PollStatus::Active => "active",
            PollStatus::Finished => "finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PollStatus::Finished
    }

    /// Compute the state reached by applying `event`.
    pub fn next(self, event: PollEvent) -> Result<PollStatus, InvalidTransition<PollStatus, PollEvent>> {
        let next = match (self, event) {
            (PollStatus::Waiting, PollEvent::Start) => PollStatus::Active,
            (PollStatus::Active, PollEvent::Finish(FinishReason::Completed)) => PollStatus::Finished,
            (from, PollEvent::Finish(FinishReason::HostEnded)) if !from.is_terminal() => {
                PollStatus::Finished
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
