use std::{sync::Arc, time::Duration};

use live_arena_back::{
    config::AppConfig,
    dao::session_store::memory::MemorySessionStore,
    dto::quiz::{CreateQuizRequest, QuestionInput, SubmitAnswerRequest},
    error::ServiceError,
    services::{
        identity::{Principal, TokenVerifier},
        public_service, quiz_service,
    },
    state::{
        AppState, SharedState,
        quiz::GameMode,
        state_machine::{FinishReason, QuizStatus},
    },
};

async fn state() -> SharedState {
    let config = AppConfig {
        auto_review: false,
        purge_grace: Duration::from_secs(3600),
        ..AppConfig::default()
    };
    AppState::with_store(
        config,
        TokenVerifier::new("integration-secret").unwrap(),
        Arc::new(MemorySessionStore::new()),
    )
    .await
}

fn principal(id: &str, name: &str) -> Principal {
    Principal {
        user_id: id.into(),
        display_name: name.into(),
    }
}

fn question(text: &str, correct_answer: u32) -> QuestionInput {
    QuestionInput {
        text: text.into(),
        options: vec!["red".into(), "green".into(), "blue".into()],
        correct_answer,
        time_limit: 20,
        image_url: None,
    }
}

fn answer(question_index: u32, selected_option: u32, time_spent: f64) -> SubmitAnswerRequest {
    SubmitAnswerRequest {
        question_index,
        selected_option,
        time_spent,
    }
}

#[tokio::test]
async fn two_question_quiz_ends_with_the_right_winner() {
    let state = state().await;
    let host = principal("host", "Host");
    let ada = principal("ada", "Ada");
    let bob = principal("bob", "Bob");

    let created = quiz_service::create_quiz(
        &state,
        &host,
        CreateQuizRequest {
            title: "Colours".into(),
            description: None,
            mode: GameMode::Classic,
            questions: vec![question("Sky?", 2), question("Grass?", 1)],
        },
    )
    .await
    .unwrap();
    let id = created.id.clone();

    let resolved = public_service::resolve_code(&state, &created.code).await.unwrap();
    assert_eq!(resolved.session_id, id);

    quiz_service::join(&state, &id, &ada).await.unwrap();
    quiz_service::join(&state, &id, &bob).await.unwrap();

    quiz_service::advance(&state, &id, &host, 0).await.unwrap();
    let first = quiz_service::submit_answer(&state, &id, &ada, answer(0, 2, 5.0)).await.unwrap();
    assert!(first.is_correct);
    assert_eq!(first.points_earned, 875);
    let wrong = quiz_service::submit_answer(&state, &id, &bob, answer(0, 0, 3.0)).await.unwrap();
    assert!(!wrong.is_correct);
    assert_eq!(wrong.points_earned, 0);

    let reviewed = quiz_service::show_results(&state, &id, &host).await.unwrap();
    assert_eq!(reviewed.status, QuizStatus::QuestionReview);
    assert_eq!(reviewed.reveals.get(&0), Some(&2));
    assert_eq!(reviewed.leaderboard[0].user_id, "ada");

    let live = quiz_service::next(&state, &id, &host).await.unwrap();
    assert_eq!(live.status, QuizStatus::Playing);
    assert_eq!(live.current_question_index, 1);

    quiz_service::submit_answer(&state, &id, &ada, answer(1, 1, 10.0)).await.unwrap();
    // Bob's live view does not carry Ada's second answer yet.
    let seen_by_bob = quiz_service::view_quiz(&state, &id, &bob).await.unwrap();
    assert!(!seen_by_bob.players["ada"].answers.contains_key(&1));
    assert_eq!(seen_by_bob.players["ada"].score, 875);

    let fast = quiz_service::submit_answer(&state, &id, &bob, answer(1, 1, 2.0)).await.unwrap();
    assert_eq!(fast.points_earned, 950);

    let finished = quiz_service::finish(&state, &id, &host).await.unwrap();
    assert_eq!(finished.status, QuizStatus::Finished);
    assert_eq!(finished.finish_reason, Some(FinishReason::HostEnded));
    assert_eq!(finished.leaderboard[0].user_id, "ada");
    assert_eq!(finished.leaderboard[0].score, 1625);
    assert_eq!(finished.leaderboard[1].user_id, "bob");

    let summary = public_service::get_archive(&state, &id).await.unwrap();
    assert_eq!(summary.winner.as_ref().map(|w| w.user_id.as_str()), Some("ada"));
    assert_eq!(summary.finish_reason, "host_ended");
    assert_eq!(summary.players.len(), 2);

    let released = public_service::resolve_code(&state, &created.code).await;
    assert!(matches!(released, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn concurrent_duplicate_answers_count_once() {
    let state = state().await;
    let host = principal("host", "Host");
    let ada = principal("ada", "Ada");

    let created = quiz_service::create_quiz(
        &state,
        &host,
        CreateQuizRequest {
            title: "Race".into(),
            description: None,
            mode: GameMode::Classic,
            questions: vec![question("Sky?", 2)],
        },
    )
    .await
    .unwrap();
    let id = created.id;
    quiz_service::join(&state, &id, &ada).await.unwrap();
    quiz_service::advance(&state, &id, &host, 0).await.unwrap();

    let attempts = (0..8).map(|_| {
        let state = state.clone();
        let id = id.clone();
        let ada = ada.clone();
        tokio::spawn(async move { quiz_service::submit_answer(&state, &id, &ada, answer(0, 2, 0.0)).await })
    });
    let mut accepted = 0;
    let mut duplicates = 0;
    for task in attempts.collect::<Vec<_>>() {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ServiceError::DuplicateSubmission(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((accepted, duplicates), (1, 7));

    let quiz = quiz_service::get_quiz(&state, &id).await.unwrap();
    let player = &quiz.players["ada"];
    assert_eq!(player.answers.len(), 1);
    assert_eq!(player.score, 1000);
}

#[tokio::test]
async fn only_the_host_drives_the_quiz() {
    let state = state().await;
    let host = principal("host", "Host");
    let ada = principal("ada", "Ada");

    let created = quiz_service::create_quiz(
        &state,
        &host,
        CreateQuizRequest {
            title: "Hosted".into(),
            description: None,
            mode: GameMode::FastAnswer,
            questions: vec![question("Sky?", 2)],
        },
    )
    .await
    .unwrap();
    quiz_service::join(&state, &created.id, &ada).await.unwrap();

    let outcome = quiz_service::advance(&state, &created.id, &ada, 0).await;
    assert!(matches!(outcome, Err(ServiceError::NotHost(_))));
    let outcome = quiz_service::finish(&state, &created.id, &ada).await;
    assert!(matches!(outcome, Err(ServiceError::NotHost(_))));

    quiz_service::advance(&state, &created.id, &host, 0).await.unwrap();
    quiz_service::submit_answer(&state, &created.id, &ada, answer(0, 2, 4.0)).await.unwrap();
    let reviewed = quiz_service::show_results(&state, &created.id, &host).await.unwrap();
    assert_eq!(reviewed.question_winners[&0].user_id, "ada");

    let done = quiz_service::next(&state, &created.id, &host).await.unwrap();
    assert_eq!(done.finish_reason, Some(FinishReason::Completed));
}
