//! Background detection of the end of a live question.
//!
//! While a question is live, a watcher polls the session and shows the results
//! on the host's behalf once every connected player answered or the question
//! timer (plus latency allowance) ran out. It stops as soon as the question is
//! no longer live, whoever closed it.

use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    services::quiz_service::{close_question, load_quiz},
    state::{SharedState, Transition, now_millis, quiz::QuizDocument, state_machine::QuizStatus},
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the watcher should do after looking at the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Wait,
    /// The question is no longer live.
    Stop,
    AllAnswered,
    TimerExpired,
}

/// Decide from a snapshot of the session whether question `question_index`
/// should be closed.
pub fn verdict(quiz: &QuizDocument, question_index: u32, now_ms: i64, latency_allowance: Duration) -> Verdict {
    if quiz.status != QuizStatus::Playing || quiz.current_index() != Some(question_index) {
        return Verdict::Stop;
    }
    if quiz.answer_progress().all_answered() {
        return Verdict::AllAnswered;
    }

    let (Some(question), Some(started_at)) = (quiz.current_question(), quiz.question_started_at) else {
        return Verdict::Wait;
    };
    let deadline = started_at
        + i64::from(question.time_limit.max(1)) * 1000
        + latency_allowance.as_millis() as i64;
    if now_ms >= deadline {
        Verdict::TimerExpired
    } else {
        Verdict::Wait
    }
}

/// Watch question `question_index` of `session_id` on a detached task.
pub fn spawn(state: SharedState, session_id: String, question_index: u32) -> JoinHandle<()> {
    tokio::spawn(async move { watch(state, session_id, question_index).await })
}

async fn watch(state: SharedState, session_id: String, question_index: u32) {
    let period = state.config().answer_poll_interval.max(MIN_POLL_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(session_id, question = question_index, "review watcher started");

    loop {
        ticker.tick().await;

        let quiz = match load(&state, &session_id).await {
            Ok(quiz) => quiz,
            Err(ServiceError::NotFound(_)) => break,
            Err(err) => {
                warn!(session_id, error = %err, "review watcher could not read the session");
                continue;
            }
        };

        let decision = verdict(&quiz, question_index, now_millis(), state.config().latency_allowance);
        match decision {
            Verdict::Wait => continue,
            Verdict::Stop => break,
            Verdict::AllAnswered | Verdict::TimerExpired => {
                match close(&state, &session_id, question_index).await {
                    Ok(()) => {
                        info!(session_id, question = question_index, trigger = ?decision, "results shown automatically");
                        break;
                    }
                    Err(ServiceError::InvalidTransition(_)) => break,
                    Err(err) => warn!(session_id, error = %err, "automatic review failed, retrying"),
                }
            }
        }
    }

    debug!(session_id, question = question_index, "review watcher stopped");
}

async fn load(state: &SharedState, session_id: &str) -> Result<QuizDocument, ServiceError> {
    let store = state.store().await?;
    load_quiz(&store, session_id).await
}

async fn close(state: &SharedState, session_id: &str, question_index: u32) -> Result<(), ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            // The host may have closed it while we waited for the gate.
            if quiz.status != QuizStatus::Playing || quiz.current_index() != Some(question_index) {
                return Ok(Transition::Done(quiz));
            }
            close_question(state, &store, &quiz).await
        })
        .await
        .map(|_| ())
}
