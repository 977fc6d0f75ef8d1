//! Tournament polls: a single-elimination bracket voted on match by match.
//!
//! Votes only touch the voted match (`votedUsers/{user}` plus one tally), so
//! concurrent voters never overwrite each other. Completing a match first
//! freezes it against the exact tallies it was decided from, then moves the
//! bracket pointer, both guarded by preconditions.

use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{
        layout,
        models::SessionKind,
        path::{DocumentRef, StorePath},
        session_store::{SharedStore, WriteBatch, encode, read_as},
        storage::StorageError,
    },
    dto::{
        chat_poll::ChatMessageRequest,
        common::{JoinResponse, SessionCreatedResponse},
        tournament::{CreateTournamentRequest, MatchPointer, MatchResultResponse, VoteRequest, VoteResponse},
    },
    error::ServiceError,
    services::{
        cleanup,
        identity::{Principal, ensure_host},
        join_code, poll_session,
    },
    state::{
        SharedState, Transition,
        bracket::{Advance, Bracket, Contestant, MatchStatus, TournamentDocument},
        chat::{ChatMessage, MessageKind, VoteRecord},
        now_millis,
        state_machine::{FinishReason, PollStatus},
    },
};

/// Attempts at freezing a match while votes keep landing on it.
const COMPLETE_ATTEMPTS: u32 = 8;

fn bracket_field(document: &DocumentRef, name: &str) -> StorePath {
    document.field("tournament").field(name)
}

fn match_path(document: &DocumentRef, round: u32, index: u32) -> StorePath {
    bracket_field(document, "rounds").field(round).field(index)
}

fn pointer(bracket: &Bracket) -> Option<MatchPointer> {
    bracket.current_match().ok().map(|current| MatchPointer {
        round: bracket.current_round,
        match_index: bracket.current_match_index,
        status: current.status,
    })
}

/// Create a tournament from the host's contestant list, shuffled into round 1.
pub async fn create_tournament(
    state: &SharedState,
    host: &Principal,
    request: CreateTournamentRequest,
) -> Result<SessionCreatedResponse, ServiceError> {
    request.validate()?;
    let store = state.store().await?;

    let items = request.items.into_iter().map(Contestant::from).collect::<Vec<_>>();
    let bracket = Bracket::build(&items, &mut rand::rng())?;

    let id = Uuid::new_v4().simple().to_string();
    let code = join_code::reserve(
        &store,
        SessionKind::Tournament,
        &id,
        state.config().join_code_attempts,
    )
    .await?;

    let tournament = TournamentDocument {
        id: id.clone(),
        code: code.clone(),
        title: request.title.trim().to_string(),
        description: request.description,
        host_id: host.user_id.clone(),
        status: PollStatus::Waiting,
        all_items: items,
        tournament: bracket,
        champion: None,
        participants: Default::default(),
        messages: Default::default(),
        created_at: now_millis(),
        finished_at: None,
        finish_reason: None,
    };

    let document = layout::tournament(&id)?;
    let root = document.root();
    let batch = WriteBatch::new(document).create(root.clone(), encode(&root, &tournament)?);
    if let Err(err) = store.write_atomic(batch).await {
        cleanup::release_code(state, &code, &id).await;
        return Err(err.into());
    }

    info!(
        session_id = %id,
        code = %code,
        contestants = tournament.all_items.len(),
        rounds = tournament.tournament.total_rounds,
        "tournament created"
    );
    Ok(SessionCreatedResponse {
        id,
        code,
        kind: SessionKind::Tournament,
    })
}

pub async fn get_tournament(state: &SharedState, session_id: &str) -> Result<TournamentDocument, ServiceError> {
    let store = state.store().await?;
    load_tournament(&store, session_id).await
}

async fn load_tournament(store: &SharedStore, session_id: &str) -> Result<TournamentDocument, ServiceError> {
    read_as::<TournamentDocument>(store, layout::tournament(session_id)?.root())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("tournament `{session_id}` not found")))
}

pub async fn join(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<JoinResponse, ServiceError> {
    let store = state.store().await?;
    let document = layout::tournament(session_id)?;
    let rejoined = poll_session::add_participant(&store, &document, principal).await?;
    Ok(JoinResponse {
        session_id: session_id.to_string(),
        user_id: principal.user_id.clone(),
        rejoined,
    })
}

/// Open the tournament for voting (host command).
pub async fn start(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<TournamentDocument, ServiceError> {
    state
        .run_host_command(session_id, || async move {
            let store = state.store().await?;
            let tournament = load_tournament(&store, session_id).await?;
            ensure_host(&tournament.host_id, principal, "start the tournament")?;
            let document = layout::tournament(session_id)?;
            poll_session::activate(&store, &document, tournament.status).await?;
            load_tournament(&store, session_id).await
        })
        .await
}

/// Let the current match accept votes (host command).
pub async fn activate_match(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<MatchPointer, ServiceError> {
    state
        .run_host_command(session_id, || async move {
            let store = state.store().await?;
            let tournament = load_tournament(&store, session_id).await?;
            ensure_host(&tournament.host_id, principal, "activate a match")?;
            if tournament.status != PollStatus::Active {
                return Err(ServiceError::InvalidTransition(format!(
                    "matches cannot be activated while the tournament is {}",
                    tournament.status.as_str()
                )));
            }

            let bracket = &tournament.tournament;
            let (round, index) = (bracket.current_round, bracket.current_match_index);
            let current = bracket.current_match()?;
            if current.status != MatchStatus::Waiting {
                return Err(ServiceError::InvalidTransition(format!(
                    "match {index} of round {round} is already {}",
                    current.status.as_str()
                )));
            }

            let document = layout::tournament(session_id)?;
            let slot = match_path(&document, round, index);
            let batch = WriteBatch::new(document.clone())
                .expect(document.field("status"), PollStatus::Active.as_str())
                .expect(bracket_field(&document, "currentRound"), round)
                .expect(bracket_field(&document, "currentMatchIndex"), index)
                .expect(slot.clone().field("status"), MatchStatus::Waiting.as_str())
                .set(slot.clone().field("status"), MatchStatus::Active.as_str())
                .set(slot.field("activatedAt"), now_millis());
            store.write_atomic(batch).await?;

            info!(session_id, round, match_index = index, "match activated");
            Ok(MatchPointer {
                round,
                match_index: index,
                status: MatchStatus::Active,
            })
        })
        .await
}

/// Record `principal`'s vote on match `index` of `round`, once per match.
pub async fn vote(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    round: u32,
    index: u32,
    request: VoteRequest,
) -> Result<VoteResponse, ServiceError> {
    request.validate()?;
    let store = state.store().await?;
    let tournament = load_tournament(&store, session_id).await?;

    if tournament.status != PollStatus::Active {
        return Err(ServiceError::InvalidTransition(format!(
            "votes are not accepted while the tournament is {}",
            tournament.status.as_str()
        )));
    }
    let contest = tournament.tournament.match_at(round, index)?;
    if contest.status != MatchStatus::Active {
        return Err(ServiceError::InvalidTransition(format!(
            "match {index} of round {round} is {}",
            contest.status.as_str()
        )));
    }
    if contest.voted_users.contains_key(&principal.user_id) {
        return Err(ServiceError::DuplicateSubmission(format!(
            "already voted on match {index} of round {round}"
        )));
    }
    let label = match (request.choice, &contest.item2) {
        (1, _) => contest.item1.name.clone(),
        (_, Some(item2)) => item2.name.clone(),
        (_, None) => {
            return Err(ServiceError::Validation(
                "this match has a single contestant".into(),
            ));
        }
    };

    let document = layout::tournament(session_id)?;
    let slot = match_path(&document, round, index);
    let voter = slot.clone().field("votedUsers").field(&principal.user_id);
    let record = VoteRecord {
        choice: request.choice,
        voted_at: now_millis(),
    };
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), PollStatus::Active.as_str())
        .expect(slot.clone().field("status"), MatchStatus::Active.as_str())
        .create(voter.clone(), encode(&voter, &record)?)
        .increment(slot.field(format!("votes{}", request.choice)), 1);
    store.write_atomic(batch).await?;

    debug!(session_id, round, match_index = index, user_id = %principal.user_id, choice = request.choice, "vote recorded");
    poll_session::annotate_vote(&store, &document, principal, &label).await;

    Ok(VoteResponse {
        accepted: true,
        choice: request.choice,
    })
}

/// Close the current match, then move the bracket on (host command).
///
/// A match found already completed (an earlier call froze it but failed to
/// advance) is only advanced.
pub async fn complete_match(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<MatchResultResponse, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let tournament = load_tournament(&store, session_id).await?;
            ensure_host(&tournament.host_id, principal, "complete a match")?;
            if tournament.status != PollStatus::Active {
                return Err(ServiceError::InvalidTransition(format!(
                    "matches cannot be completed while the tournament is {}",
                    tournament.status.as_str()
                )));
            }

            let document = layout::tournament(session_id)?;
            let round = tournament.tournament.current_round;
            let index = tournament.tournament.current_match_index;
            freeze_match(&store, &document, round, index).await?;
            advance_bracket(state, &store, &document, round, index).await
        })
        .await
}

/// Mark the match completed against the tallies its winner is decided from.
async fn freeze_match(store: &SharedStore, document: &DocumentRef, round: u32, index: u32) -> Result<(), ServiceError> {
    let slot = match_path(document, round, index);

    for attempt in 1..=COMPLETE_ATTEMPTS {
        let tournament = load_tournament(store, document.key()).await?;
        let contest = tournament.tournament.match_at(round, index)?;
        match contest.status {
            MatchStatus::Completed => return Ok(()),
            MatchStatus::Waiting => {
                return Err(ServiceError::InvalidTransition(format!(
                    "match {index} of round {round} was never activated"
                )));
            }
            MatchStatus::Active => {}
        }

        let (votes1, votes2) = (contest.votes1, contest.votes2);
        let winner = contest.decide(votes1, votes2);
        let winner_path = slot.clone().field("winner");
        let batch = WriteBatch::new(document.clone())
            .expect(slot.clone().field("status"), MatchStatus::Active.as_str())
            .expect(slot.clone().field("votes1"), votes1)
            .expect(slot.clone().field("votes2"), votes2)
            .set(slot.clone().field("status"), MatchStatus::Completed.as_str())
            .set(winner_path.clone(), encode(&winner_path, &winner)?);

        match store.write_atomic(batch).await {
            Ok(()) => {
                info!(session_id = document.key(), round, match_index = index, votes1, votes2, winner = %winner.name, "match completed");
                return Ok(());
            }
            // A vote landed between the read and the write; decide again.
            Err(err @ StorageError::Conflict { .. }) => {
                debug!(session_id = document.key(), attempt, error = %err, "match tallies moved, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(session_id = document.key(), round, match_index = index, "match kept receiving votes while closing");
    Err(ServiceError::InvalidTransition(format!(
        "match {index} of round {round} kept changing, try again"
    )))
}

async fn advance_bracket(
    state: &SharedState,
    store: &SharedStore,
    document: &DocumentRef,
    round: u32,
    index: u32,
) -> Result<Transition<MatchResultResponse>, ServiceError> {
    let tournament = load_tournament(store, document.key()).await?;
    let completed = tournament.tournament.match_at(round, index)?.clone();
    let mut bracket = tournament.tournament.clone();
    let outcome = bracket.advance()?;

    let mut batch = WriteBatch::new(document.clone())
        .expect(bracket_field(document, "currentRound"), round)
        .expect(bracket_field(document, "currentMatchIndex"), index)
        .set(bracket_field(document, "currentRound"), bracket.current_round)
        .set(bracket_field(document, "currentMatchIndex"), bracket.current_match_index);
    for (new_round, matches) in bracket.rounds.range(round + 1..) {
        let path = bracket_field(document, "rounds").field(new_round);
        batch = batch.set(path.clone(), encode(&path, matches)?);
    }

    let champion = match &outcome {
        Advance::Champion(champion) => {
            let path = document.field("champion");
            batch = batch.set(path.clone(), encode(&path, champion)?);
            batch = poll_session::finishing(batch, document, tournament.status, FinishReason::Completed, now_millis())?;
            Some(champion.clone())
        }
        Advance::NextMatch { .. } | Advance::NextRound { .. } => None,
    };
    store.write_atomic(batch).await?;

    let response = MatchResultResponse {
        round,
        match_index: index,
        winner: completed.winner.clone().unwrap_or_else(|| completed.decide(completed.votes1, completed.votes2)),
        votes1: completed.votes1,
        votes2: completed.votes2,
        next: champion.is_none().then(|| pointer(&bracket)).flatten(),
        champion,
    };

    match &outcome {
        Advance::Champion(champion) => {
            info!(session_id = document.key(), champion = %champion.name, "tournament finished");
            return Ok(poll_session::after_finish(state, document, &tournament.code, response));
        }
        Advance::NextRound { round, index } => {
            info!(session_id = document.key(), round, match_index = index, "next round built");
        }
        Advance::NextMatch { index } => {
            debug!(session_id = document.key(), match_index = index, "moved to next match");
        }
    }

    Ok(Transition::Done(response))
}

/// End the tournament early (host command).
pub async fn finish(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<TournamentDocument, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let tournament = load_tournament(&store, session_id).await?;
            ensure_host(&tournament.host_id, principal, "end the tournament")?;

            let document = layout::tournament(session_id)?;
            let finished_at = now_millis();
            let batch = poll_session::finishing(
                WriteBatch::new(document.clone()),
                &document,
                tournament.status,
                FinishReason::HostEnded,
                finished_at,
            )?;
            store.write_atomic(batch).await?;
            info!(session_id, "tournament ended by host");

            let code = tournament.code.clone();
            let finished = TournamentDocument {
                status: PollStatus::Finished,
                finished_at: Some(finished_at),
                finish_reason: Some(FinishReason::HostEnded),
                ..tournament
            };
            Ok(poll_session::after_finish(state, &document, &code, finished))
        })
        .await
}

/// Append a chat line to the tournament log.
pub async fn post_message(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    request: ChatMessageRequest,
) -> Result<ChatMessage, ServiceError> {
    let body = poll_session::message_body(&request.body, state.config().chat_message_max_len)?;
    let store = state.store().await?;
    let document = layout::tournament(session_id)?;
    if poll_session::current_status(&store, &document).await?.is_terminal() {
        return Err(ServiceError::InvalidTransition("the tournament is over".into()));
    }
    poll_session::append_message(&store, &document, principal, body, MessageKind::Chat).await
}
