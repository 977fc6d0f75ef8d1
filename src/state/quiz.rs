//! Quiz session aggregate and the values derived from it.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::state_machine::{FinishReason, QuizStatus};

/// How a question's results are summarized when answers close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Running scores, ranked on a leaderboard.
    Classic,
    /// One winner per question: the fastest correct answer.
    FastAnswer,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Classic => "classic",
            GameMode::FastAnswer => "fast_answer",
        }
    }
}

/// Question as players see it: the correct option is kept in the answer key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub text: String,
    pub options: Vec<String>,
    /// Seconds players have to answer.
    pub time_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Correct option index of every question, stored apart from the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerKey {
    pub correct: Vec<u32>,
}

impl AnswerKey {
    pub fn is_correct(&self, question_index: u32, option: u32) -> Option<bool> {
        self.correct
            .get(question_index as usize)
            .map(|correct| *correct == option)
    }
}

/// A player's response to one question. Written once, never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub selected_option: u32,
    pub is_correct: bool,
    /// Seconds, clamped to the question time limit.
    pub time_spent: f64,
    pub points_earned: i64,
    /// Server time of the submission, milliseconds since the Unix epoch.
    pub answered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub user_id: String,
    pub display_name: String,
    pub score: i64,
    #[serde(default)]
    pub answers: BTreeMap<u32, AnswerRecord>,
    #[serde(default)]
    pub connected: bool,
    pub joined_at: i64,
}

impl PlayerRecord {
    pub fn new(user_id: String, display_name: String, joined_at: i64) -> Self {
        Self {
            user_id,
            display_name,
            score: 0,
            answers: BTreeMap::new(),
            connected: false,
            joined_at,
        }
    }

    pub fn correct_count(&self) -> u32 {
        self.answers.values().filter(|answer| answer.is_correct).count() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Dense rank: equal scores share a rank.
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub score: i64,
}

/// Fastest correct responder of a question (fast-answer mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionWinner {
    pub user_id: String,
    pub display_name: String,
    pub time_spent: f64,
    pub answered_at: i64,
}

/// The live quiz document every participant subscribes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuizDocument {
    pub id: String,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub host_id: String,
    pub mode: GameMode,
    pub status: QuizStatus,
    /// `-1` until the first question goes live.
    pub current_question_index: i64,
    #[serde(default)]
    pub question_started_at: Option<i64>,
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    pub questions: Vec<PublicQuestion>,
    #[serde(default)]
    pub players: BTreeMap<String, PlayerRecord>,
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(default)]
    pub question_winners: BTreeMap<u32, QuestionWinner>,
    /// Correct option of each reviewed question, published on "show results".
    #[serde(default)]
    pub reveals: BTreeMap<u32, u32>,
}

/// How many connected players already answered the live question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerProgress {
    pub question_index: i64,
    pub connected: u32,
    pub answered: u32,
}

impl AnswerProgress {
    /// True once every connected player answered. With nobody connected
    /// there is no one to wait for, but nothing to review either, so the
    /// timer decides instead.
    pub fn all_answered(&self) -> bool {
        self.connected > 0 && self.answered >= self.connected
    }
}

impl QuizDocument {
    /// Index of the live question, if one was started.
    pub fn current_index(&self) -> Option<u32> {
        u32::try_from(self.current_question_index).ok()
    }

    pub fn current_question(&self) -> Option<&PublicQuestion> {
        self.current_index()
            .and_then(|index| self.questions.get(index as usize))
    }

    /// Index the host may advance to next, `None` once the last question was played.
    pub fn next_index(&self) -> Option<u32> {
        let next = self.current_question_index + 1;
        (next >= 0 && (next as usize) < self.questions.len()).then_some(next as u32)
    }

    pub fn answer_progress(&self) -> AnswerProgress {
        let current = self.current_index();
        let connected = self.players.values().filter(|player| player.connected);
        let (connected, answered) = connected.fold((0, 0), |(connected, answered), player| {
            let has_answered =
                current.is_some_and(|index| player.answers.contains_key(&index));
            (connected + 1, answered + u32::from(has_answered))
        });

        AnswerProgress {
            question_index: self.current_question_index,
            connected,
            answered,
        }
    }

    /// The document as a player may see it. While a question is live, the
    /// answers to it (and the points they earned) would tell who picked the
    /// correct option, so they are withheld until review.
    pub fn player_view(mut self) -> Self {
        if self.status != QuizStatus::Playing {
            return self;
        }
        let Some(index) = self.current_index() else {
            return self;
        };

        for player in self.players.values_mut() {
            if let Some(answer) = player.answers.remove(&index) {
                player.score -= answer.points_earned;
            }
        }
        self
    }

    /// The document as `user_id` may see it; the host sees everything.
    pub fn view_for(self, user_id: &str) -> Self {
        if self.host_id == user_id {
            self
        } else {
            self.player_view()
        }
    }

    pub fn leaderboard(&self, size: usize) -> Vec<LeaderboardEntry> {
        compute_leaderboard(self.players.values(), size)
    }

    pub fn question_winner(&self, question_index: u32) -> Option<QuestionWinner> {
        compute_question_winner(self.players.values(), question_index)
    }
}

fn by_standing(left: &PlayerRecord, right: &PlayerRecord) -> Ordering {
    right
        .score
        .cmp(&left.score)
        .then_with(|| left.user_id.cmp(&right.user_id))
}

/// Every player ordered by score (descending), ties broken by user id.
pub fn rank_players<'a>(players: impl IntoIterator<Item = &'a PlayerRecord>) -> Vec<(u32, &'a PlayerRecord)> {
    let mut ordered = players.into_iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| by_standing(left, right));

    let mut rank = 0;
    let mut previous = None;
    ordered
        .into_iter()
        .map(|player| {
            if previous != Some(player.score) {
                rank += 1;
                previous = Some(player.score);
            }
            (rank, player)
        })
        .collect()
}

/// Top `size` players with dense ranks. Deterministic for a given set of players.
pub fn compute_leaderboard<'a>(
    players: impl IntoIterator<Item = &'a PlayerRecord>,
    size: usize,
) -> Vec<LeaderboardEntry> {
    rank_players(players)
        .into_iter()
        .take(size)
        .map(|(rank, player)| LeaderboardEntry {
            rank,
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            score: player.score,
        })
        .collect()
}

/// Fastest correct answer to `question_index`; ties on time go to the
/// earliest submission, then to the smallest user id.
pub fn compute_question_winner<'a>(
    players: impl IntoIterator<Item = &'a PlayerRecord>,
    question_index: u32,
) -> Option<QuestionWinner> {
    players
        .into_iter()
        .filter_map(|player| {
            player
                .answers
                .get(&question_index)
                .filter(|answer| answer.is_correct)
                .map(|answer| (player, answer))
        })
        .min_by(|(left_player, left), (right_player, right)| {
            left.time_spent
                .total_cmp(&right.time_spent)
                .then(left.answered_at.cmp(&right.answered_at))
                .then_with(|| left_player.user_id.cmp(&right_player.user_id))
        })
        .map(|(player, answer)| QuestionWinner {
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            time_spent: answer.time_spent,
            answered_at: answer.answered_at,
        })
}

/// Remaining time of a live question as a client should display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Countdown {
    Running {
        #[serde(rename = "remainingMs")]
        remaining_ms: u64,
    },
    Expired,
    /// The start timestamp was already stale when first observed (typically
    /// a reconnect after the question changed); wait for the next update.
    Resyncing,
}

impl Countdown {
    /// Derive the countdown from the shared start timestamp.
    ///
    /// `first_observation` marks the first time a client sees this
    /// `started_at`; a timestamp that is already past its limit at that point
    /// cannot be trusted to describe the question on screen.
    pub fn compute(time_limit_secs: u32, started_at_ms: i64, now_ms: i64, first_observation: bool) -> Self {
        let limit_ms = i64::from(time_limit_secs.max(1)) * 1000;
        // A start in the future (clock skew) counts as just started.
        let elapsed = now_ms.saturating_sub(started_at_ms).max(0);

        if elapsed > limit_ms && first_observation {
            Countdown::Resyncing
        } else if elapsed >= limit_ms {
            Countdown::Expired
        } else {
            Countdown::Running {
                remaining_ms: (limit_ms - elapsed) as u64,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, score: i64) -> PlayerRecord {
        let mut record = PlayerRecord::new(id.into(), id.to_uppercase(), 0);
        record.score = score;
        record
    }

    fn answered(mut record: PlayerRecord, index: u32, correct: bool, time_spent: f64, at: i64) -> PlayerRecord {
        record.answers.insert(
            index,
            AnswerRecord {
                selected_option: 0,
                is_correct: correct,
                time_spent,
                points_earned: 0,
                answered_at: at,
            },
        );
        record
    }

    fn quiz_with(players: Vec<PlayerRecord>) -> QuizDocument {
        QuizDocument {
            id: "q".into(),
            code: "123456".into(),
            title: "t".into(),
            description: None,
            host_id: "h".into(),
            mode: GameMode::Classic,
            status: QuizStatus::Playing,
            current_question_index: 0,
            question_started_at: Some(0),
            created_at: 0,
            finished_at: None,
            finish_reason: None,
            questions: Vec::new(),
            players: players
                .into_iter()
                .map(|record| (record.user_id.clone(), record))
                .collect(),
            leaderboard: Vec::new(),
            question_winners: BTreeMap::new(),
            reveals: BTreeMap::new(),
        }
    }

    #[test]
    fn leaderboard_is_sorted_with_dense_ranks_and_id_tiebreak() {
        let players = [player("c", 500), player("a", 900), player("b", 500), player("d", 100)];
        let board = compute_leaderboard(players.iter(), 50);

        let order = board
            .iter()
            .map(|entry| (entry.rank, entry.user_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(1, "a"), (2, "b"), (2, "c"), (3, "d")]);
    }

    #[test]
    fn leaderboard_is_truncated_and_idempotent() {
        let players = (0..80).map(|i| player(&format!("p{i:02}"), i * 10)).collect::<Vec<_>>();
        let first = compute_leaderboard(players.iter(), 50);
        let second = compute_leaderboard(players.iter().rev(), 50);

        assert_eq!(first.len(), 50);
        assert_eq!(first[0].user_id, "p79");
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn question_winner_prefers_earliest_among_equal_times() {
        let players = [
            answered(player("x", 0), 0, true, 4.2, 100),
            answered(player("y", 0), 0, true, 3.9, 300),
            answered(player("z", 0), 0, true, 3.9, 200),
        ];
        let winner = compute_question_winner(players.iter(), 0).unwrap();
        assert_eq!(winner.user_id, "z");
    }

    #[test]
    fn incorrect_answers_never_win() {
        let players = [
            answered(player("x", 0), 0, false, 0.5, 1),
            answered(player("y", 0), 0, true, 9.0, 2),
        ];
        assert_eq!(compute_question_winner(players.iter(), 0).unwrap().user_id, "y");
        assert!(compute_question_winner(players[..1].iter(), 0).is_none());
    }

    #[test]
    fn countdown_detects_stale_start() {
        assert_eq!(
            Countdown::compute(20, 0, 5_000, true),
            Countdown::Running { remaining_ms: 15_000 }
        );
        assert_eq!(Countdown::compute(20, 0, 25_000, true), Countdown::Resyncing);
        assert_eq!(Countdown::compute(20, 0, 25_000, false), Countdown::Expired);
        assert_eq!(
            Countdown::compute(20, 10_000, 0, true),
            Countdown::Running { remaining_ms: 20_000 }
        );
    }

    #[test]
    fn player_view_hides_the_live_question_only() {
        let earlier = answered(player("a", 0), 0, true, 2.0, 10);
        let mut live = answered(earlier, 1, true, 1.0, 20);
        live.score = 1900;
        if let Some(answer) = live.answers.get_mut(&1) {
            answer.points_earned = 950;
        }
        let mut quiz = quiz_with(vec![live]);
        quiz.current_question_index = 1;

        let view = quiz.clone().player_view();
        let a = &view.players["a"];
        assert!(a.answers.contains_key(&0));
        assert!(!a.answers.contains_key(&1));
        assert_eq!(a.score, 950);

        quiz.status = QuizStatus::QuestionReview;
        assert_eq!(quiz.clone().player_view(), quiz);
    }

    #[test]
    fn progress_only_counts_connected_players() {
        let mut online = answered(player("a", 0), 0, true, 1.0, 1);
        online.connected = true;
        let mut waiting = player("b", 0);
        waiting.connected = true;
        let offline = player("c", 0);

        let mut doc = quiz_with(vec![online, waiting.clone(), offline]);

        let progress = doc.answer_progress();
        assert_eq!((progress.connected, progress.answered), (2, 1));
        assert!(!progress.all_answered());

        doc.players.insert("b".into(), answered(waiting, 0, false, 2.0, 2));
        assert!(doc.answer_progress().all_answered());
    }
}
