//! Quiz lifecycle: creation, joining, question progression, answers and the
//! finish pipeline.
//!
//! Every status transition is issued by the host (or by the review watcher on
//! its behalf) through [`AppState::run_host_transition`](crate::state::AppState::run_host_transition),
//! and every write carries the status it was decided from as a precondition,
//! so a transition computed from a stale read fails instead of applying.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{
        layout,
        models::SessionKind,
        path::DocumentRef,
        session_store::{SharedStore, WriteBatch, encode, read_as},
        storage::{ConflictKind, StorageError},
    },
    dto::{
        common::{JoinResponse, SessionCreatedResponse},
        quiz::{AnswerResponse, CreateQuizRequest, QuestionStartedResponse, SubmitAnswerRequest},
    },
    error::ServiceError,
    services::{
        archive, cleanup,
        identity::{Principal, ensure_host},
        join_code, review_watcher, scoring,
    },
    state::{
        SharedState, Transition, now_millis,
        quiz::{
            AnswerKey, AnswerProgress, AnswerRecord, Countdown, GameMode, LeaderboardEntry, PlayerRecord,
            QuestionWinner, QuizDocument,
        },
        state_machine::{FinishReason, QuizEvent, QuizStatus},
    },
};

const JOIN_ATTEMPTS: u32 = 3;

/// Create a quiz hosted by `host`. The answer key is stored apart from the
/// session document players subscribe to.
pub async fn create_quiz(
    state: &SharedState,
    host: &Principal,
    request: CreateQuizRequest,
) -> Result<SessionCreatedResponse, ServiceError> {
    request.validate()?;
    let store = state.store().await?;

    let id = Uuid::new_v4().simple().to_string();
    let code = join_code::reserve(
        &store,
        SessionKind::Quiz,
        &id,
        state.config().join_code_attempts,
    )
    .await?;

    let (questions, key) = request.split_questions();
    let document = QuizDocument {
        id: id.clone(),
        code: code.clone(),
        title: request.title.trim().to_string(),
        description: request.description,
        host_id: host.user_id.clone(),
        mode: request.mode,
        status: QuizStatus::Waiting,
        current_question_index: -1,
        question_started_at: None,
        created_at: now_millis(),
        finished_at: None,
        finish_reason: None,
        questions,
        players: Default::default(),
        leaderboard: Vec::new(),
        question_winners: Default::default(),
        reveals: Default::default(),
    };

    if let Err(err) = persist_new_quiz(&store, &document, &key).await {
        cleanup::release_code(state, &code, &id).await;
        return Err(err);
    }

    info!(session_id = %id, code = %code, host_id = %host.user_id, questions = document.questions.len(), "quiz created");
    Ok(SessionCreatedResponse {
        id,
        code,
        kind: SessionKind::Quiz,
    })
}

async fn persist_new_quiz(
    store: &SharedStore,
    document: &QuizDocument,
    key: &AnswerKey,
) -> Result<(), ServiceError> {
    let key_doc = layout::answer_key(&document.id)?;
    let key_root = key_doc.root();
    store
        .write_atomic(WriteBatch::new(key_doc).create(key_root.clone(), encode(&key_root, key)?))
        .await?;

    let quiz_doc = layout::quiz(&document.id)?;
    let quiz_root = quiz_doc.root();
    store
        .write_atomic(WriteBatch::new(quiz_doc).create(quiz_root.clone(), encode(&quiz_root, document)?))
        .await?;
    Ok(())
}

/// Current state of a quiz as players see it.
pub async fn get_quiz(state: &SharedState, session_id: &str) -> Result<QuizDocument, ServiceError> {
    let store = state.store().await?;
    load_quiz(&store, session_id).await
}

/// The quiz as `viewer` may see it while a question is live.
pub async fn view_quiz(
    state: &SharedState,
    session_id: &str,
    viewer: &Principal,
) -> Result<QuizDocument, ServiceError> {
    Ok(get_quiz(state, session_id).await?.view_for(&viewer.user_id))
}

pub(crate) async fn load_quiz(store: &SharedStore, session_id: &str) -> Result<QuizDocument, ServiceError> {
    read_as::<QuizDocument>(store, layout::quiz(session_id)?.root())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz `{session_id}` not found")))
}

async fn load_answer_key(store: &SharedStore, session_id: &str) -> Result<AnswerKey, ServiceError> {
    read_as::<AnswerKey>(store, layout::answer_key(session_id)?.root())
        .await?
        .ok_or_else(|| ServiceError::Internal(format!("answer key of quiz `{session_id}` is missing")))
}

/// Add `principal` to the players. Joining twice keeps the existing record.
pub async fn join(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<JoinResponse, ServiceError> {
    let store = state.store().await?;
    let document = layout::quiz(session_id)?;
    let player_path = document.field("players").field(&principal.user_id);

    for _ in 0..JOIN_ATTEMPTS {
        let quiz = load_quiz(&store, session_id).await?;
        if quiz.status.is_terminal() {
            return Err(ServiceError::InvalidTransition(format!(
                "quiz `{session_id}` is finished"
            )));
        }
        if quiz.players.contains_key(&principal.user_id) {
            return Ok(joined(session_id, principal, true));
        }

        let mut record = PlayerRecord::new(
            principal.user_id.clone(),
            principal.display_name.clone(),
            now_millis(),
        );
        record.connected = true;

        let batch = WriteBatch::new(document.clone())
            .expect(document.field("status"), quiz.status.as_str())
            .create(player_path.clone(), encode(&player_path, &record)?);

        match store.write_atomic(batch).await {
            Ok(()) => {
                info!(session_id, user_id = %principal.user_id, "player joined quiz");
                return Ok(joined(session_id, principal, false));
            }
            Err(StorageError::Conflict {
                kind: ConflictKind::AlreadyExists,
                ..
            }) => return Ok(joined(session_id, principal, true)),
            // Status moved under us; re-read and decide again.
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidTransition(format!(
        "quiz `{session_id}` kept changing while joining"
    )))
}

fn joined(session_id: &str, principal: &Principal, rejoined: bool) -> JoinResponse {
    JoinResponse {
        session_id: session_id.to_string(),
        user_id: principal.user_id.clone(),
        rejoined,
    }
}

/// Put question `question_index` live. It must be the question right after
/// the current one.
pub async fn advance(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    question_index: u32,
) -> Result<QuestionStartedResponse, ServiceError> {
    state
        .run_host_command(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            ensure_host(&quiz.host_id, principal, "advance the quiz")?;
            start_question(state, &store, &quiz, question_index).await
        })
        .await
}

async fn start_question(
    state: &SharedState,
    store: &SharedStore,
    quiz: &QuizDocument,
    question_index: u32,
) -> Result<QuestionStartedResponse, ServiceError> {
    let event = match quiz.status {
        QuizStatus::Waiting => QuizEvent::Start,
        _ => QuizEvent::NextQuestion,
    };
    let next = quiz.status.next(event)?;

    match quiz.next_index() {
        Some(expected) if expected == question_index => {}
        Some(expected) => {
            return Err(ServiceError::InvalidTransition(format!(
                "question {question_index} requested but question {expected} is next"
            )));
        }
        None => {
            return Err(ServiceError::InvalidTransition(
                "no question left to advance to".into(),
            ));
        }
    }

    let document = layout::quiz(&quiz.id)?;
    let started_at = now_millis();
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), quiz.status.as_str())
        .expect(
            document.field("currentQuestionIndex"),
            quiz.current_question_index,
        )
        .set(document.field("status"), next.as_str())
        .set(document.field("currentQuestionIndex"), question_index)
        .set(document.field("questionStartedAt"), started_at);
    store.write_atomic(batch).await?;

    info!(session_id = %quiz.id, question = question_index, "question is live");

    if state.config().auto_review {
        review_watcher::spawn(state.clone(), quiz.id.clone(), question_index);
    }

    Ok(QuestionStartedResponse {
        question_index,
        question_started_at: started_at,
    })
}

/// Record `principal`'s answer to the live question, at most once.
///
/// Correctness comes from the stored answer key; the time charged is never
/// below what the server clock measured (minus the latency allowance).
pub async fn submit_answer(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    request: SubmitAnswerRequest,
) -> Result<AnswerResponse, ServiceError> {
    if !request.time_spent.is_finite() {
        return Err(ServiceError::Validation(
            "time spent must be a finite number of seconds".into(),
        ));
    }

    let store = state.store().await?;
    let quiz = load_quiz(&store, session_id).await?;
    let index = request.question_index;

    if quiz.status != QuizStatus::Playing {
        return Err(ServiceError::InvalidTransition(format!(
            "answers are not accepted while the quiz is {}",
            quiz.status.as_str()
        )));
    }
    if quiz.current_index() != Some(index) {
        return Err(ServiceError::InvalidTransition(format!(
            "question {index} is not the live question"
        )));
    }
    let Some(player) = quiz.players.get(&principal.user_id) else {
        return Err(ServiceError::NotFound(format!(
            "`{}` has not joined quiz `{session_id}`",
            principal.user_id
        )));
    };
    if player.answers.contains_key(&index) {
        return Err(ServiceError::DuplicateSubmission(format!(
            "question {index} already answered"
        )));
    }
    let question = quiz
        .current_question()
        .ok_or_else(|| ServiceError::Internal(format!("question {index} is missing")))?;
    if request.selected_option as usize >= question.options.len() {
        return Err(ServiceError::Validation(format!(
            "option {} does not exist, question {index} has {} options",
            request.selected_option,
            question.options.len()
        )));
    }

    let key = load_answer_key(&store, session_id).await?;
    let is_correct = key
        .is_correct(index, request.selected_option)
        .ok_or_else(|| ServiceError::Internal(format!("no correct answer stored for question {index}")))?;

    let answered_at = now_millis();
    let limit = f64::from(question.time_limit);
    let elapsed_ms = answered_at - quiz.question_started_at.unwrap_or(answered_at);
    let time_spent = scoring::effective_time_spent(
        request.time_spent,
        Duration::from_millis(elapsed_ms.max(0) as u64),
        state.config().latency_allowance,
        limit,
    );
    let points_earned = scoring::score(limit, time_spent, is_correct);

    let record = AnswerRecord {
        selected_option: request.selected_option,
        is_correct,
        time_spent,
        points_earned,
        answered_at,
    };

    let document = layout::quiz(session_id)?;
    let player_path = document.field("players").field(&principal.user_id);
    let answer_path = player_path.clone().field("answers").field(index);
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), QuizStatus::Playing.as_str())
        .expect(document.field("currentQuestionIndex"), index)
        .expect_present(player_path.clone())
        .create(answer_path.clone(), encode(&answer_path, &record)?)
        .increment(player_path.field("score"), points_earned);
    store.write_atomic(batch).await?;

    debug!(session_id, user_id = %principal.user_id, question = index, is_correct, points_earned, "answer recorded");

    Ok(AnswerResponse {
        accepted: true,
        is_correct,
        points_earned,
        time_spent,
    })
}

/// Close the live question and publish its results (host command).
pub async fn show_results(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<QuizDocument, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            ensure_host(&quiz.host_id, principal, "show results")?;
            close_question(state, &store, &quiz).await
        })
        .await
}

/// Move `quiz` from `playing` to `question_review` and reveal the correct
/// option. The mode's aggregate is derived by the follow-up, from the answers
/// as they stand after the cutoff. Callers must hold the session's host gate.
pub(crate) async fn close_question(
    state: &SharedState,
    store: &SharedStore,
    quiz: &QuizDocument,
) -> Result<Transition<QuizDocument>, ServiceError> {
    let next = quiz.status.next(QuizEvent::ShowResults)?;
    let index = quiz
        .current_index()
        .ok_or_else(|| ServiceError::InvalidTransition("no question is live".into()))?;
    let key = load_answer_key(store, &quiz.id).await?;
    let correct = key
        .correct
        .get(index as usize)
        .copied()
        .ok_or_else(|| ServiceError::Internal(format!("no correct answer stored for question {index}")))?;

    let document = layout::quiz(&quiz.id)?;
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), QuizStatus::Playing.as_str())
        .expect(document.field("currentQuestionIndex"), index)
        .set(document.field("status"), next.as_str())
        .set(document.field("reveals").field(index), correct);
    store.write_atomic(batch).await?;

    info!(session_id = %quiz.id, question = index, "question closed for review");

    let mut committed = quiz.clone();
    committed.status = next;
    committed.reveals.insert(index, correct);
    let follow_up = publish_review(state.clone(), store.clone(), document, committed.clone(), index);
    Ok(Transition::Committed {
        committed,
        follow_up: Box::pin(follow_up),
    })
}

async fn publish_review(
    state: SharedState,
    store: SharedStore,
    document: DocumentRef,
    committed: QuizDocument,
    index: u32,
) -> QuizDocument {
    let mut reviewed = match load_quiz(&store, &committed.id).await {
        Ok(reviewed) => reviewed,
        Err(err) => {
            warn!(session_id = %committed.id, question = index, error = %err, "could not re-read reviewed quiz");
            return committed;
        }
    };

    match reviewed.mode {
        GameMode::Classic => {
            match store_leaderboard(&store, &document, &reviewed, state.config().leaderboard_size).await {
                Ok(entries) => reviewed.leaderboard = entries,
                Err(err) => warn!(session_id = %reviewed.id, error = %err, "leaderboard update failed"),
            }
        }
        GameMode::FastAnswer => {
            if let Some(winner) = reviewed.question_winner(index) {
                match store_question_winner(&store, &document, index, &winner).await {
                    Ok(()) => {
                        reviewed
                            .question_winners
                            .entry(index)
                            .or_insert(winner);
                    }
                    Err(err) => warn!(session_id = %reviewed.id, question = index, error = %err, "question winner not stored"),
                }
            }
        }
    }

    reviewed
}

/// Record the winner of question `index` once; an existing winner is kept.
async fn store_question_winner(
    store: &SharedStore,
    document: &DocumentRef,
    index: u32,
    winner: &QuestionWinner,
) -> Result<(), ServiceError> {
    let path = document.field("questionWinners").field(index);
    let batch = WriteBatch::new(document.clone()).create(path.clone(), encode(&path, winner)?);
    match store.write_atomic(batch).await {
        Ok(())
        | Err(StorageError::Conflict {
            kind: ConflictKind::AlreadyExists,
            ..
        }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn store_leaderboard(
    store: &SharedStore,
    document: &DocumentRef,
    quiz: &QuizDocument,
    size: usize,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    let entries = quiz.leaderboard(size);
    let path = document.field("leaderboard");
    let batch = WriteBatch::new(document.clone())
        .expect_present(document.field("status"))
        .set(path.clone(), encode(&path, &entries)?);
    store.write_atomic(batch).await?;
    Ok(entries)
}

/// Advance past the reviewed question, or finish the quiz after the last one.
pub async fn next(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<QuizDocument, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            ensure_host(&quiz.host_id, principal, "move to the next question")?;

            if quiz.status != QuizStatus::QuestionReview {
                return Err(ServiceError::InvalidTransition(format!(
                    "cannot move on while the quiz is {}",
                    quiz.status.as_str()
                )));
            }

            match quiz.next_index() {
                Some(index) => {
                    start_question(state, &store, &quiz, index).await?;
                    load_quiz(&store, session_id).await.map(Transition::Done)
                }
                None => finish_quiz(state, &store, &quiz, FinishReason::Completed).await,
            }
        })
        .await
}

/// End the quiz early from any live state (host command).
pub async fn finish(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<QuizDocument, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            ensure_host(&quiz.host_id, principal, "end the quiz")?;
            finish_quiz(state, &store, &quiz, FinishReason::HostEnded).await
        })
        .await
}

/// Reach `finished`. The follow-up stores the final leaderboard, archives the
/// quiz, releases the code and schedules the purge; none of it can undo or
/// fail the transition.
async fn finish_quiz(
    state: &SharedState,
    store: &SharedStore,
    quiz: &QuizDocument,
    reason: FinishReason,
) -> Result<Transition<QuizDocument>, ServiceError> {
    let next = quiz.status.next(QuizEvent::Finish(reason))?;
    let document = layout::quiz(&quiz.id)?;
    let answer_key = layout::answer_key(&quiz.id)?;
    let finished_at = now_millis();
    let reason_path = document.field("finishReason");

    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), quiz.status.as_str())
        .set(document.field("status"), next.as_str())
        .set(document.field("finishedAt"), finished_at)
        .set(reason_path.clone(), encode(&reason_path, &reason)?);
    store.write_atomic(batch).await?;

    info!(session_id = %quiz.id, reason = ?reason, "quiz finished");

    let mut committed = quiz.clone();
    committed.status = next;
    committed.finished_at = Some(finished_at);
    committed.finish_reason = Some(reason);
    let follow_up = wrap_up(state.clone(), store.clone(), committed.clone(), document, answer_key);
    Ok(Transition::Committed {
        committed,
        follow_up: Box::pin(follow_up),
    })
}

async fn wrap_up(
    state: SharedState,
    store: SharedStore,
    committed: QuizDocument,
    document: DocumentRef,
    answer_key: DocumentRef,
) -> QuizDocument {
    let finished_at = committed.finished_at.unwrap_or_else(now_millis);
    let reason = committed.finish_reason.unwrap_or(FinishReason::HostEnded);
    let mut finished = match load_quiz(&store, &committed.id).await {
        Ok(finished) => finished,
        Err(err) => {
            warn!(session_id = %committed.id, error = %err, "could not re-read finished quiz");
            committed
        }
    };

    if finished.mode == GameMode::Classic {
        match store_leaderboard(&store, &document, &finished, state.config().leaderboard_size).await {
            Ok(entries) => finished.leaderboard = entries,
            Err(err) => {
                warn!(session_id = %finished.id, error = %err, "final leaderboard not stored");
                finished.leaderboard = finished.leaderboard(state.config().leaderboard_size);
            }
        }
    }

    let summary = archive::summarize(&finished, finished_at, reason);
    if let Err(err) = archive::store_summary(&store, &summary).await {
        warn!(session_id = %finished.id, error = %err, "quiz archive not written");
    }

    cleanup::release_code(&state, &finished.code, &finished.id).await;
    cleanup::schedule_purge(&state, &finished.id, vec![document, answer_key]);

    finished
}

/// Re-derive and store the leaderboard. Idempotent.
pub async fn recompute_leaderboard(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    state
        .run_host_command(session_id, || async move {
            let store = state.store().await?;
            let quiz = load_quiz(&store, session_id).await?;
            ensure_host(&quiz.host_id, principal, "recompute the leaderboard")?;
            let document = layout::quiz(session_id)?;
            store_leaderboard(&store, &document, &quiz, state.config().leaderboard_size).await
        })
        .await
}

/// How many connected players answered the live question (host only).
pub async fn answer_progress(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<AnswerProgress, ServiceError> {
    let quiz = get_quiz(state, session_id).await?;
    ensure_host(&quiz.host_id, principal, "watch answer progress")?;
    Ok(quiz.answer_progress())
}

/// Remaining time of the live question.
pub async fn countdown(
    state: &SharedState,
    session_id: &str,
    first_observation: bool,
) -> Result<Countdown, ServiceError> {
    let quiz = get_quiz(state, session_id).await?;
    match quiz.status {
        QuizStatus::Waiting => Err(ServiceError::InvalidTransition(
            "no question has started yet".into(),
        )),
        QuizStatus::QuestionReview | QuizStatus::Finished => Ok(Countdown::Expired),
        QuizStatus::Playing => {
            let (Some(question), Some(started_at)) = (quiz.current_question(), quiz.question_started_at) else {
                return Ok(Countdown::Resyncing);
            };
            Ok(Countdown::compute(
                question.time_limit,
                started_at,
                now_millis(),
                first_observation,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::memory::MemorySessionStore,
        dto::quiz::QuestionInput,
        services::identity::TokenVerifier,
        state::AppState,
    };

    fn config() -> AppConfig {
        AppConfig {
            auto_review: false,
            purge_grace: Duration::from_secs(3600),
            ..AppConfig::default()
        }
    }

    async fn state() -> SharedState {
        state_with(config(), MemorySessionStore::new()).await
    }

    async fn state_with(config: AppConfig, store: MemorySessionStore) -> SharedState {
        AppState::with_store(config, TokenVerifier::new("secret").unwrap(), Arc::new(store)).await
    }

    /// A one-question quiz with `ada` answered and the question live.
    async fn answered_quiz(state: &SharedState, host: &Principal) -> SessionCreatedResponse {
        let created = create_quiz(state, host, request(1)).await.unwrap();
        join(state, &created.id, &principal("ada")).await.unwrap();
        advance(state, &created.id, host, 0).await.unwrap();
        submit_answer(state, &created.id, &principal("ada"), answer(0, 1)).await.unwrap();
        created
    }

    fn principal(id: &str) -> Principal {
        Principal {
            user_id: id.into(),
            display_name: id.to_uppercase(),
        }
    }

    fn request(questions: usize) -> CreateQuizRequest {
        CreateQuizRequest {
            title: "Capitals".into(),
            description: None,
            mode: GameMode::Classic,
            questions: (0..questions)
                .map(|i| QuestionInput {
                    text: format!("Question {i}"),
                    options: vec!["a".into(), "b".into(), "c".into()],
                    correct_answer: 1,
                    time_limit: 20,
                    image_url: None,
                })
                .collect(),
        }
    }

    fn answer(index: u32, option: u32) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_index: index,
            selected_option: option,
            time_spent: 1.0,
        }
    }

    #[tokio::test]
    async fn players_never_see_the_answer_key_before_review() {
        let state = state().await;
        let host = principal("host");
        let created = create_quiz(&state, &host, request(1)).await.unwrap();

        advance(&state, &created.id, &host, 0).await.unwrap();
        let store = state.store().await.unwrap();
        let live = store
            .read(layout::quiz(&created.id).unwrap().root())
            .await
            .unwrap()
            .unwrap();
        assert!(!live.to_string().contains("correct"));
        assert!(live["reveals"].as_object().is_none_or(|reveals| reveals.is_empty()));

        let reviewed = show_results(&state, &created.id, &host).await.unwrap();
        assert_eq!(reviewed.reveals.get(&0), Some(&1));
    }

    #[tokio::test]
    async fn advance_must_target_the_next_question() {
        let state = state().await;
        let host = principal("host");
        let created = create_quiz(&state, &host, request(3)).await.unwrap();

        let skipped = advance(&state, &created.id, &host, 1).await;
        assert!(matches!(skipped, Err(ServiceError::InvalidTransition(_))));

        advance(&state, &created.id, &host, 0).await.unwrap();
        let during_play = advance(&state, &created.id, &host, 1).await;
        assert!(matches!(during_play, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn only_the_host_drives_the_quiz() {
        let state = state().await;
        let created = create_quiz(&state, &principal("host"), request(1)).await.unwrap();
        let outcome = advance(&state, &created.id, &principal("mallory"), 0).await;
        assert!(matches!(outcome, Err(ServiceError::NotHost(_))));
    }

    #[tokio::test]
    async fn joining_twice_is_a_rejoin() {
        let state = state().await;
        let created = create_quiz(&state, &principal("host"), request(1)).await.unwrap();
        let player = principal("ada");

        assert!(!join(&state, &created.id, &player).await.unwrap().rejoined);
        assert!(join(&state, &created.id, &player).await.unwrap().rejoined);
        assert_eq!(get_quiz(&state, &created.id).await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn answers_are_checked_against_the_live_question() {
        let state = state().await;
        let host = principal("host");
        let player = principal("ada");
        let created = create_quiz(&state, &host, request(2)).await.unwrap();
        join(&state, &created.id, &player).await.unwrap();

        let early = submit_answer(&state, &created.id, &player, answer(0, 1)).await;
        assert!(matches!(early, Err(ServiceError::InvalidTransition(_))));

        advance(&state, &created.id, &host, 0).await.unwrap();
        let wrong_question = submit_answer(&state, &created.id, &player, answer(1, 1)).await;
        assert!(matches!(wrong_question, Err(ServiceError::InvalidTransition(_))));
        let bad_option = submit_answer(&state, &created.id, &player, answer(0, 7)).await;
        assert!(matches!(bad_option, Err(ServiceError::Validation(_))));
        let stranger = submit_answer(&state, &created.id, &principal("bob"), answer(0, 1)).await;
        assert!(matches!(stranger, Err(ServiceError::NotFound(_))));

        let accepted = submit_answer(&state, &created.id, &player, answer(0, 1)).await.unwrap();
        assert!(accepted.is_correct);
        assert!(accepted.points_earned >= 500);

        let again = submit_answer(&state, &created.id, &player, answer(0, 0)).await;
        assert!(matches!(again, Err(ServiceError::DuplicateSubmission(_))));
    }

    #[tokio::test]
    async fn non_finite_time_is_rejected() {
        let state = state().await;
        let created = create_quiz(&state, &principal("host"), request(1)).await.unwrap();
        let mut request = answer(0, 1);
        request.time_spent = f64::NAN;
        let outcome = submit_answer(&state, &created.id, &principal("ada"), request).await;
        assert!(matches!(outcome, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn host_can_end_from_waiting_and_the_code_is_released() {
        let state = state().await;
        let host = principal("host");
        let created = create_quiz(&state, &host, request(1)).await.unwrap();

        let finished = finish(&state, &created.id, &host).await.unwrap();
        assert_eq!(finished.status, QuizStatus::Finished);
        assert_eq!(finished.finish_reason, Some(FinishReason::HostEnded));

        let store = state.store().await.unwrap();
        assert!(matches!(
            join_code::resolve(&store, &created.code).await,
            Err(ServiceError::NotFound(_))
        ));
        let summary = archive::load_summary(&store, &created.id).await.unwrap();
        assert_eq!(summary.finish_reason, "host_ended");

        let late = join(&state, &created.id, &principal("ada")).await;
        assert!(matches!(late, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn countdown_needs_a_started_question() {
        let state = state().await;
        let host = principal("host");
        let created = create_quiz(&state, &host, request(1)).await.unwrap();
        assert!(countdown(&state, &created.id, true).await.is_err());

        advance(&state, &created.id, &host, 0).await.unwrap();
        assert!(matches!(
            countdown(&state, &created.id, true).await.unwrap(),
            Countdown::Running { .. }
        ));
    }

    #[tokio::test]
    async fn archive_failure_does_not_block_the_finish() {
        let store = MemorySessionStore::new();
        store.fail_writes_to("archives");
        let state = state_with(config(), store).await;
        let host = principal("host");
        let created = answered_quiz(&state, &host).await;

        let finished = finish(&state, &created.id, &host).await.unwrap();
        assert_eq!(finished.status, QuizStatus::Finished);
        assert_eq!(finished.leaderboard[0].user_id, "ada");

        let stored = get_quiz(&state, &created.id).await.unwrap();
        assert_eq!(stored.status, QuizStatus::Finished);
        let shared = state.store().await.unwrap();
        assert!(matches!(
            archive::load_summary(&shared, &created.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            join_code::resolve(&shared, &created.code).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn slow_archive_write_does_not_fail_a_committed_finish() {
        let store = MemorySessionStore::new();
        store.delay_writes_to("archives", Duration::from_millis(300));
        let config = AppConfig {
            transition_timeout: Duration::from_millis(100),
            ..config()
        };
        let state = state_with(config, store).await;
        let host = principal("host");
        let created = answered_quiz(&state, &host).await;

        let finished = finish(&state, &created.id, &host).await.unwrap();
        assert_eq!(finished.status, QuizStatus::Finished);
        assert_eq!(finished.finish_reason, Some(FinishReason::HostEnded));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let shared = state.store().await.unwrap();
        let summary = archive::load_summary(&shared, &created.id).await.unwrap();
        assert_eq!(summary.winner.map(|winner| winner.user_id), Some("ada".to_string()));
        assert!(matches!(
            join_code::resolve(&shared, &created.code).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(state.active_host_gates(), 0);
    }

    #[tokio::test]
    async fn finished_quiz_is_purged_after_the_grace_period() {
        let config = AppConfig {
            purge_grace: Duration::from_millis(50),
            ..config()
        };
        let state = state_with(config, MemorySessionStore::new()).await;
        let host = principal("host");
        let created = answered_quiz(&state, &host).await;

        finish(&state, &created.id, &host).await.unwrap();
        let shared = state.store().await.unwrap();
        assert!(shared.read(layout::quiz(&created.id).unwrap().root()).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(shared.read(layout::quiz(&created.id).unwrap().root()).await.unwrap().is_none());
        assert!(shared.read(layout::answer_key(&created.id).unwrap().root()).await.unwrap().is_none());
        assert!(archive::load_summary(&shared, &created.id).await.is_ok());
    }

    #[tokio::test]
    async fn host_commands_on_unknown_quizzes_leave_no_gate_behind() {
        let state = state().await;
        let host = principal("host");
        for i in 0..50 {
            let outcome = show_results(&state, &format!("nope{i}"), &host).await;
            assert!(matches!(outcome, Err(ServiceError::NotFound(_))));
        }
        assert_eq!(state.active_host_gates(), 0);
    }
}
