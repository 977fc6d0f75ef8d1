//! Tournament aggregate: single-elimination bracket built from a shuffled
//! contestant list, advanced round by round from match winners.

use std::collections::BTreeMap;

use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::{
    chat::{ChatMessage, Participant, VoteRecord},
    state_machine::{FinishReason, PollStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Contestant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    /// Accepting votes.
    Active,
    Completed,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
        }
    }
}

/// One pairwise contest; a missing second slot is a bye.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub item1: Contestant,
    #[serde(default)]
    pub item2: Option<Contestant>,
    #[serde(default)]
    pub votes1: i64,
    #[serde(default)]
    pub votes2: i64,
    #[serde(default)]
    pub voted_users: BTreeMap<String, VoteRecord>,
    pub status: MatchStatus,
    #[serde(default)]
    pub winner: Option<Contestant>,
    #[serde(default)]
    pub activated_at: Option<i64>,
}

impl Match {
    fn pair(item1: Contestant, item2: Contestant) -> Self {
        Self {
            item1,
            item2: Some(item2),
            votes1: 0,
            votes2: 0,
            voted_users: BTreeMap::new(),
            status: MatchStatus::Waiting,
            winner: None,
            activated_at: None,
        }
    }

    /// A bye is born completed, its only contestant already the winner.
    fn bye(item: Contestant) -> Self {
        Self {
            item1: item.clone(),
            item2: None,
            votes1: 0,
            votes2: 0,
            voted_users: BTreeMap::new(),
            status: MatchStatus::Completed,
            winner: Some(item),
            activated_at: None,
        }
    }

    pub fn is_bye(&self) -> bool {
        self.item2.is_none()
    }

    /// Winner for the given tallies: slot 1 takes ties.
    pub fn decide(&self, votes1: i64, votes2: i64) -> Contestant {
        match &self.item2 {
            Some(item2) if votes2 > votes1 => item2.clone(),
            _ => self.item1.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    #[error("a bracket needs at least two contestants, got {0}")]
    TooFewContestants(usize),
    #[error("round {round} has no match {index}")]
    NoSuchMatch { round: u32, index: u32 },
    #[error("match {index} of round {round} is not completed yet")]
    MatchPending { round: u32, index: u32 },
}

/// Where the bracket stands after [`Bracket::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Next match of the same round.
    NextMatch { index: u32 },
    /// The previous round is complete; a new one was built.
    NextRound { round: u32, index: u32 },
    /// One contestant remains.
    Champion(Contestant),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub total_rounds: u32,
    /// 1-indexed.
    pub current_round: u32,
    pub current_match_index: u32,
    pub rounds: BTreeMap<u32, Vec<Match>>,
}

/// `ceil(log2(n))`, the number of rounds needed to reduce `n` contestants to one.
pub fn total_rounds(contestants: usize) -> u32 {
    match contestants {
        0 | 1 => 0,
        n => (n - 1).ilog2() + 1,
    }
}

/// Pair consecutive contestants; an odd one out gets a bye.
fn pair_round(contestants: Vec<Contestant>) -> Vec<Match> {
    let mut matches = Vec::with_capacity(contestants.len().div_ceil(2));
    let mut iter = contestants.into_iter();
    while let Some(first) = iter.next() {
        matches.push(match iter.next() {
            Some(second) => Match::pair(first, second),
            None => Match::bye(first),
        });
    }
    matches
}

fn first_open(matches: &[Match]) -> Option<u32> {
    matches
        .iter()
        .position(|m| m.status != MatchStatus::Completed)
        .map(|index| index as u32)
}

impl Bracket {
    /// Shuffle `contestants` uniformly and build round 1.
    pub fn build<R: Rng + ?Sized>(contestants: &[Contestant], rng: &mut R) -> Result<Self, BracketError> {
        if contestants.len() < 2 {
            return Err(BracketError::TooFewContestants(contestants.len()));
        }

        let mut shuffled = contestants.to_vec();
        shuffled.shuffle(rng);
        let first_round = pair_round(shuffled);
        let current_match_index = first_open(&first_round).unwrap_or(0);

        Ok(Self {
            total_rounds: total_rounds(contestants.len()),
            current_round: 1,
            current_match_index,
            rounds: BTreeMap::from([(1, first_round)]),
        })
    }

    pub fn current_round_matches(&self) -> &[Match] {
        self.rounds
            .get(&self.current_round)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn match_at(&self, round: u32, index: u32) -> Result<&Match, BracketError> {
        self.rounds
            .get(&round)
            .and_then(|matches| matches.get(index as usize))
            .ok_or(BracketError::NoSuchMatch { round, index })
    }

    pub fn current_match(&self) -> Result<&Match, BracketError> {
        self.match_at(self.current_round, self.current_match_index)
    }

    /// Record the outcome of a match: completed, with the tally-decided winner.
    pub fn complete(&mut self, round: u32, index: u32, votes1: i64, votes2: i64) -> Result<Contestant, BracketError> {
        let slot = self
            .rounds
            .get_mut(&round)
            .and_then(|matches| matches.get_mut(index as usize))
            .ok_or(BracketError::NoSuchMatch { round, index })?;

        let winner = slot.decide(votes1, votes2);
        slot.votes1 = votes1;
        slot.votes2 = votes2;
        slot.status = MatchStatus::Completed;
        slot.winner = Some(winner.clone());
        Ok(winner)
    }

    /// Move past the current (completed) match.
    ///
    /// Later rounds are only built once every match of the current round is
    /// completed, from its winners in bracket order.
    pub fn advance(&mut self) -> Result<Advance, BracketError> {
        let round = self.current_round;
        let index = self.current_match_index;
        if self.current_match()?.status != MatchStatus::Completed {
            return Err(BracketError::MatchPending { round, index });
        }

        let matches = self.current_round_matches();
        if let Some(next) = matches
            .iter()
            .enumerate()
            .skip(index as usize + 1)
            .find(|(_, m)| m.status != MatchStatus::Completed)
            .map(|(next, _)| next as u32)
        {
            self.current_match_index = next;
            return Ok(Advance::NextMatch { index: next });
        }

        if let Some(open) = first_open(matches) {
            // An earlier match of this round is still open.
            self.current_match_index = open;
            return Ok(Advance::NextMatch { index: open });
        }

        loop {
            let winners = self
                .current_round_matches()
                .iter()
                .filter_map(|m| m.winner.clone())
                .collect::<Vec<_>>();

            if winners.len() <= 1 {
                return winners
                    .into_iter()
                    .next()
                    .map(Advance::Champion)
                    .ok_or(BracketError::TooFewContestants(0));
            }

            let next_round = pair_round(winners);
            self.current_round += 1;
            let open = first_open(&next_round);
            self.rounds.insert(self.current_round, next_round);

            // A round made only of byes completes immediately.
            if let Some(open) = open {
                self.current_match_index = open;
                return Ok(Advance::NextRound {
                    round: self.current_round,
                    index: open,
                });
            }
            self.current_match_index = 0;
        }
    }
}

/// The live tournament document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TournamentDocument {
    pub id: String,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub host_id: String,
    pub status: PollStatus,
    /// Contestants as entered, before shuffling.
    pub all_items: Vec<Contestant>,
    pub tournament: Bracket,
    #[serde(default)]
    pub champion: Option<Contestant>,
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default)]
    pub messages: BTreeMap<String, ChatMessage>,
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}
