//! Immutable end-of-game summaries of quiz sessions.

use crate::{
    dao::{
        layout,
        models::{AggregateStats, ArchiveSummary, ArchivedPlayer},
        session_store::{SharedStore, WriteBatch, encode, read_as},
        storage::{ConflictKind, StorageError, StorageResult},
    },
    error::ServiceError,
    state::{
        quiz::{PlayerRecord, QuizDocument, rank_players},
        state_machine::FinishReason,
    },
};

fn archived_player(rank: u32, player: &PlayerRecord) -> ArchivedPlayer {
    let answered_count = player.answers.len() as u32;
    let total_time: f64 = player.answers.values().map(|answer| answer.time_spent).sum();

    ArchivedPlayer {
        user_id: player.user_id.clone(),
        display_name: player.display_name.clone(),
        rank,
        score: player.score,
        correct_count: player.correct_count(),
        answered_count,
        average_time_spent: if answered_count == 0 {
            0.0
        } else {
            total_time / f64::from(answered_count)
        },
    }
}

fn aggregate(players: &[ArchivedPlayer]) -> AggregateStats {
    let count = players.len();
    let mean = |total: f64| if count == 0 { 0.0 } else { total / count as f64 };

    AggregateStats {
        player_count: count as u32,
        average_score: mean(players.iter().map(|p| p.score as f64).sum()),
        average_correct: mean(players.iter().map(|p| f64::from(p.correct_count)).sum()),
        high_score: players.iter().map(|p| p.score).max().unwrap_or(0),
        low_score: players.iter().map(|p| p.score).min().unwrap_or(0),
    }
}

/// Summarize a finished session. Ranking uses the same order as the leaderboard.
pub fn summarize(document: &QuizDocument, finished_at: i64, reason: FinishReason) -> ArchiveSummary {
    let players = rank_players(document.players.values())
        .into_iter()
        .map(|(rank, player)| archived_player(rank, player))
        .collect::<Vec<_>>();

    ArchiveSummary {
        session_id: document.id.clone(),
        title: document.title.clone(),
        host_id: document.host_id.clone(),
        mode: document.mode.as_str().to_string(),
        question_count: document.questions.len() as u32,
        created_at: document.created_at,
        finished_at,
        finish_reason: match reason {
            FinishReason::Completed => "completed",
            FinishReason::HostEnded => "host_ended",
        }
        .to_string(),
        winner: players.first().cloned(),
        top_three: players.iter().take(3).cloned().collect(),
        stats: aggregate(&players),
        players,
    }
}

/// Persist `summary` once. Writing the same archive again is a no-op.
pub async fn store_summary(store: &SharedStore, summary: &ArchiveSummary) -> StorageResult<()> {
    let document = layout::archive(&summary.session_id)?;
    let root = document.root();
    let batch = WriteBatch::new(document).create(root.clone(), encode(&root, summary)?);

    match store.write_atomic(batch).await {
        Err(StorageError::Conflict {
            kind: ConflictKind::AlreadyExists,
            ..
        }) => Ok(()),
        other => other,
    }
}

pub async fn load_summary(store: &SharedStore, session_id: &str) -> Result<ArchiveSummary, ServiceError> {
    read_as::<ArchiveSummary>(store, layout::archive(session_id)?.root())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no archive for session {session_id}")))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use super::*;
    use crate::{
        dao::session_store::memory::MemorySessionStore,
        state::{
            quiz::{AnswerRecord, GameMode},
            state_machine::QuizStatus,
        },
    };

    fn player(id: &str, score: i64, answers: &[(bool, f64)]) -> PlayerRecord {
        let mut record = PlayerRecord::new(id.into(), id.into(), 0);
        record.score = score;
        for (index, (is_correct, time_spent)) in answers.iter().enumerate() {
            record.answers.insert(
                index as u32,
                AnswerRecord {
                    selected_option: 0,
                    is_correct: *is_correct,
                    time_spent: *time_spent,
                    points_earned: 0,
                    answered_at: 0,
                },
            );
        }
        record
    }

    fn finished_quiz() -> QuizDocument {
        let players = [
            player("a", 1700, &[(true, 5.0), (true, 7.0)]),
            player("b", 0, &[(false, 3.0), (false, 1.0)]),
            player("c", 900, &[(true, 2.0)]),
        ];
        QuizDocument {
            id: "q1".into(),
            code: "123456".into(),
            title: "Trivia".into(),
            description: None,
            host_id: "host".into(),
            mode: GameMode::Classic,
            status: QuizStatus::Finished,
            current_question_index: 1,
            question_started_at: None,
            created_at: 1,
            finished_at: Some(2),
            finish_reason: Some(FinishReason::Completed),
            questions: Vec::new(),
            players: players
                .into_iter()
                .map(|p| (p.user_id.clone(), p))
                .collect::<BTreeMap<_, _>>(),
            leaderboard: Vec::new(),
            question_winners: BTreeMap::new(),
            reveals: BTreeMap::new(),
        }
    }

    #[test]
    fn summary_ranks_players_and_aggregates() {
        let summary = summarize(&finished_quiz(), 2, FinishReason::Completed);

        assert_eq!(summary.winner.as_ref().unwrap().user_id, "a");
        let order = summary.top_three.iter().map(|p| p.user_id.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["a", "c", "b"]);

        let a = &summary.players[0];
        assert_eq!((a.correct_count, a.answered_count), (2, 2));
        assert!((a.average_time_spent - 6.0).abs() < 1e-9);

        assert_eq!(summary.stats.player_count, 3);
        assert_eq!(summary.stats.high_score, 1700);
        assert_eq!(summary.stats.low_score, 0);
        assert!((summary.stats.average_score - 2600.0 / 3.0).abs() < 1e-9);
        assert!((summary.stats.average_correct - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_session_has_no_winner() {
        let mut quiz = finished_quiz();
        quiz.players.clear();
        let summary = summarize(&quiz, 2, FinishReason::HostEnded);
        assert!(summary.winner.is_none());
        assert_eq!(summary.stats.average_score, 0.0);
        assert_eq!(summary.finish_reason, "host_ended");
    }

    #[tokio::test]
    async fn archives_are_written_once() {
        let store: SharedStore = Arc::new(MemorySessionStore::new());
        let summary = summarize(&finished_quiz(), 2, FinishReason::Completed);
        store_summary(&store, &summary).await.unwrap();

        let mut altered = summary.clone();
        altered.title = "rewritten".into();
        store_summary(&store, &altered).await.unwrap();

        assert_eq!(load_summary(&store, "q1").await.unwrap().title, "Trivia");
    }
}
