use std::{collections::BTreeSet, sync::Arc, time::Duration};

use live_arena_back::{
    config::AppConfig,
    dao::session_store::memory::MemorySessionStore,
    dto::tournament::{ContestantInput, CreateTournamentRequest, VoteRequest},
    services::{
        identity::{Principal, TokenVerifier},
        tournament_service,
    },
    state::{
        AppState, SharedState,
        bracket::{MatchStatus, total_rounds},
        state_machine::PollStatus,
    },
};

async fn state() -> SharedState {
    let config = AppConfig {
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

fn principal(id: &str) -> Principal {
    Principal {
        user_id: id.into(),
        display_name: id.to_uppercase(),
    }
}

fn request(count: usize) -> CreateTournamentRequest {
    CreateTournamentRequest {
        title: format!("{count} contestants"),
        description: None,
        items: (0..count)
            .map(|i| ContestantInput {
                name: format!("item-{i}"),
                image_url: None,
            })
            .collect(),
    }
}

#[tokio::test]
async fn every_bracket_size_produces_one_champion() {
    let state = state().await;
    let host = principal("host");

    for count in 2..=9 {
        let created = tournament_service::create_tournament(&state, &host, request(count))
            .await
            .unwrap();
        tournament_service::start(&state, &created.id, &host).await.unwrap();

        let mut completions = 0;
        let champion = loop {
            tournament_service::activate_match(&state, &created.id, &host).await.unwrap();
            let result = tournament_service::complete_match(&state, &created.id, &host)
                .await
                .unwrap();
            completions += 1;
            // Nobody votes, so the first slot wins every match.
            assert_eq!((result.votes1, result.votes2), (0, 0));
            if let Some(champion) = result.champion {
                break champion;
            }
            assert!(completions < count, "bracket of {count} did not terminate");
        };

        let tournament = tournament_service::get_tournament(&state, &created.id).await.unwrap();
        let names = tournament
            .all_items
            .iter()
            .map(|item| item.name.as_str())
            .collect::<BTreeSet<_>>();
        assert!(names.contains(champion.name.as_str()));
        assert_eq!(tournament.status, PollStatus::Finished);
        assert_eq!(tournament.tournament.rounds.len() as u32, total_rounds(count));
        assert_eq!(tournament.tournament.total_rounds, total_rounds(count));

        let byes = tournament
            .tournament
            .rounds
            .values()
            .flatten()
            .filter(|m| m.is_bye())
            .collect::<Vec<_>>();
        assert!(byes.iter().all(|m| m.status == MatchStatus::Completed && m.winner.as_ref() == Some(&m.item1)));
        // Byes never needed a host command.
        let played = tournament.tournament.rounds.values().flatten().count() - byes.len();
        assert_eq!(played, completions);
        assert_eq!(completions, count - 1);
    }
}

#[tokio::test]
async fn concurrent_votes_for_both_slots_are_both_counted() {
    let state = state().await;
    let host = principal("host");
    let created = tournament_service::create_tournament(&state, &host, request(2)).await.unwrap();
    tournament_service::start(&state, &created.id, &host).await.unwrap();
    tournament_service::activate_match(&state, &created.id, &host).await.unwrap();

    let ballots = [("ada", 1), ("bob", 2)].map(|(voter, choice)| {
        let state = state.clone();
        let id = created.id.clone();
        tokio::spawn(async move {
            tournament_service::vote(&state, &id, &principal(voter), 1, 0, VoteRequest { choice }).await
        })
    });
    for ballot in ballots {
        ballot.await.unwrap().unwrap();
    }

    let tournament = tournament_service::get_tournament(&state, &created.id).await.unwrap();
    let contest = tournament.tournament.match_at(1, 0).unwrap();
    assert_eq!((contest.votes1, contest.votes2), (1, 1));
    assert!(contest.voted_users.contains_key("ada"));
    assert!(contest.voted_users.contains_key("bob"));

    // Ties go to the first slot.
    let result = tournament_service::complete_match(&state, &created.id, &host).await.unwrap();
    assert_eq!(result.winner, contest.item1);
    assert_eq!(result.champion, Some(contest.item1.clone()));
}
