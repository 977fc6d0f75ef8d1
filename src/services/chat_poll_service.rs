//! Two-option polls with a live chat.

use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{
        layout,
        models::SessionKind,
        session_store::{SharedStore, WriteBatch, encode, read_as},
    },
    dto::{
        chat_poll::{ChatMessageRequest, CreateChatPollRequest},
        common::{JoinResponse, SessionCreatedResponse},
        tournament::{VoteRequest, VoteResponse},
    },
    error::ServiceError,
    services::{
        cleanup,
        identity::{Principal, ensure_host},
        join_code, poll_session,
    },
    state::{
        SharedState,
        chat::{ChatMessage, ChatPollDocument, MessageKind, VoteRecord},
        now_millis,
        state_machine::{FinishReason, PollStatus},
    },
};

pub async fn create_chat_poll(
    state: &SharedState,
    host: &Principal,
    request: CreateChatPollRequest,
) -> Result<SessionCreatedResponse, ServiceError> {
    request.validate()?;
    let store = state.store().await?;

    let id = Uuid::new_v4().simple().to_string();
    let code = join_code::reserve(
        &store,
        SessionKind::Poll,
        &id,
        state.config().join_code_attempts,
    )
    .await?;

    let poll = ChatPollDocument {
        id: id.clone(),
        code: code.clone(),
        title: request.title.trim().to_string(),
        question: request.question.trim().to_string(),
        option1: request.option1.trim().to_string(),
        option2: request.option2.trim().to_string(),
        host_id: host.user_id.clone(),
        status: PollStatus::Waiting,
        votes1: 0,
        votes2: 0,
        voted_users: Default::default(),
        participants: Default::default(),
        messages: Default::default(),
        created_at: now_millis(),
        finished_at: None,
        finish_reason: None,
    };

    let document = layout::chat_poll(&id)?;
    let root = document.root();
    let batch = WriteBatch::new(document).create(root.clone(), encode(&root, &poll)?);
    if let Err(err) = store.write_atomic(batch).await {
        cleanup::release_code(state, &code, &id).await;
        return Err(err.into());
    }

    info!(session_id = %id, code = %code, "chat poll created");
    Ok(SessionCreatedResponse {
        id,
        code,
        kind: SessionKind::Poll,
    })
}

pub async fn get_chat_poll(state: &SharedState, session_id: &str) -> Result<ChatPollDocument, ServiceError> {
    let store = state.store().await?;
    load_chat_poll(&store, session_id).await
}

async fn load_chat_poll(store: &SharedStore, session_id: &str) -> Result<ChatPollDocument, ServiceError> {
    read_as::<ChatPollDocument>(store, layout::chat_poll(session_id)?.root())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("chat poll `{session_id}` not found")))
}

pub async fn join(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<JoinResponse, ServiceError> {
    let store = state.store().await?;
    let document = layout::chat_poll(session_id)?;
    let rejoined = poll_session::add_participant(&store, &document, principal).await?;
    Ok(JoinResponse {
        session_id: session_id.to_string(),
        user_id: principal.user_id.clone(),
        rejoined,
    })
}

/// Open the poll for votes (host command).
pub async fn start(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<ChatPollDocument, ServiceError> {
    state
        .run_host_command(session_id, || async move {
            let store = state.store().await?;
            let poll = load_chat_poll(&store, session_id).await?;
            ensure_host(&poll.host_id, principal, "start the poll")?;
            let document = layout::chat_poll(session_id)?;
            poll_session::activate(&store, &document, poll.status).await?;
            load_chat_poll(&store, session_id).await
        })
        .await
}

/// Record `principal`'s vote, once per poll. The tally and the voter record
/// are written together; the chat annotation follows on its own.
pub async fn vote(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    request: VoteRequest,
) -> Result<VoteResponse, ServiceError> {
    request.validate()?;
    let store = state.store().await?;
    let poll = load_chat_poll(&store, session_id).await?;

    if poll.status != PollStatus::Active {
        return Err(ServiceError::InvalidTransition(format!(
            "votes are not accepted while the poll is {}",
            poll.status.as_str()
        )));
    }
    if poll.voted_users.contains_key(&principal.user_id) {
        return Err(ServiceError::DuplicateSubmission("already voted on this poll".into()));
    }

    let document = layout::chat_poll(session_id)?;
    let voter = document.field("votedUsers").field(&principal.user_id);
    let record = VoteRecord {
        choice: request.choice,
        voted_at: now_millis(),
    };
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), PollStatus::Active.as_str())
        .create(voter.clone(), encode(&voter, &record)?)
        .increment(document.field(format!("votes{}", request.choice)), 1);
    store.write_atomic(batch).await?;

    debug!(session_id, user_id = %principal.user_id, choice = request.choice, "poll vote recorded");
    let label = if request.choice == 1 { &poll.option1 } else { &poll.option2 };
    poll_session::annotate_vote(&store, &document, principal, label).await;

    Ok(VoteResponse {
        accepted: true,
        choice: request.choice,
    })
}

pub async fn post_message(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
    request: ChatMessageRequest,
) -> Result<ChatMessage, ServiceError> {
    let body = poll_session::message_body(&request.body, state.config().chat_message_max_len)?;
    let store = state.store().await?;
    let document = layout::chat_poll(session_id)?;
    if poll_session::current_status(&store, &document).await?.is_terminal() {
        return Err(ServiceError::InvalidTransition("the poll is closed".into()));
    }
    poll_session::append_message(&store, &document, principal, body, MessageKind::Chat).await
}

/// Close the poll (host command). Closing a poll that never started counts as
/// the host ending it.
pub async fn close(
    state: &SharedState,
    session_id: &str,
    principal: &Principal,
) -> Result<ChatPollDocument, ServiceError> {
    state
        .run_host_transition(session_id, || async move {
            let store = state.store().await?;
            let poll = load_chat_poll(&store, session_id).await?;
            ensure_host(&poll.host_id, principal, "close the poll")?;

            let reason = match poll.status {
                PollStatus::Active => FinishReason::Completed,
                _ => FinishReason::HostEnded,
            };
            let document = layout::chat_poll(session_id)?;
            let finished_at = now_millis();
            let batch = poll_session::finishing(
                WriteBatch::new(document.clone()),
                &document,
                poll.status,
                reason,
                finished_at,
            )?;
            store.write_atomic(batch).await?;
            info!(session_id, votes1 = poll.votes1, votes2 = poll.votes2, leader = ?poll.leader(), "chat poll closed");

            let code = poll.code.clone();
            let closed = ChatPollDocument {
                status: PollStatus::Finished,
                finished_at: Some(finished_at),
                finish_reason: Some(reason),
                ..poll
            };
            Ok(poll_session::after_finish(state, &document, &code, closed))
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore,
        services::identity::TokenVerifier, state::AppState,
    };

    async fn state() -> SharedState {
        let config = AppConfig {
            purge_grace: Duration::from_secs(3600),
            chat_message_max_len: 20,
            ..AppConfig::default()
        };
        AppState::with_store(
            config,
            TokenVerifier::new("secret").unwrap(),
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

    async fn running_poll(state: &SharedState, host: &Principal) -> String {
        let created = create_chat_poll(
            state,
            host,
            CreateChatPollRequest {
                title: "Lunch".into(),
                question: "Pizza or sushi?".into(),
                option1: "Pizza".into(),
                option2: "Sushi".into(),
            },
        )
        .await
        .unwrap();
        start(state, &created.id, host).await.unwrap();
        created.id
    }

    #[tokio::test]
    async fn concurrent_voters_are_all_counted_once() {
        let state = state().await;
        let host = principal("host");
        let id = running_poll(&state, &host).await;

        let voters = (0..20).map(|i| {
            let state = state.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let voter = principal(&format!("voter{i}"));
                let choice = if i % 2 == 0 { 1 } else { 2 };
                vote(&state, &id, &voter, VoteRequest { choice }).await
            })
        });
        for task in voters.collect::<Vec<_>>() {
            task.await.unwrap().unwrap();
        }

        let poll = get_chat_poll(&state, &id).await.unwrap();
        assert_eq!((poll.votes1, poll.votes2), (10, 10));
        assert_eq!(poll.voted_users.len(), 20);
        assert_eq!(poll.leader(), None);
        let annotations = poll.messages.values().filter(|m| m.kind == MessageKind::Vote).count();
        assert_eq!(annotations, 20);
    }

    #[tokio::test]
    async fn a_voter_votes_once() {
        let state = state().await;
        let host = principal("host");
        let id = running_poll(&state, &host).await;
        let voter = principal("ada");

        vote(&state, &id, &voter, VoteRequest { choice: 1 }).await.unwrap();
        let again = vote(&state, &id, &voter, VoteRequest { choice: 2 }).await;
        assert!(matches!(again, Err(ServiceError::DuplicateSubmission(_))));

        let bad = vote(&state, &id, &principal("bob"), VoteRequest { choice: 3 }).await;
        assert!(matches!(bad, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn chat_is_bounded_and_closes_with_the_poll() {
        let state = state().await;
        let host = principal("host");
        let id = running_poll(&state, &host).await;
        let ada = principal("ada");

        let message = post_message(&state, &id, &ada, ChatMessageRequest { body: " hello ".into() })
            .await
            .unwrap();
        assert_eq!(message.body, "hello");
        assert_eq!(message.author_name, "ADA");

        let long = post_message(&state, &id, &ada, ChatMessageRequest { body: "x".repeat(21) }).await;
        assert!(matches!(long, Err(ServiceError::Validation(_))));

        let closed = close(&state, &id, &host).await.unwrap();
        assert_eq!(closed.finish_reason, Some(FinishReason::Completed));
        let late = post_message(&state, &id, &ada, ChatMessageRequest { body: "hi".into() }).await;
        assert!(matches!(late, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn slow_code_release_does_not_fail_a_committed_close() {
        let store = MemorySessionStore::new();
        let config = AppConfig {
            purge_grace: Duration::from_secs(3600),
            transition_timeout: Duration::from_millis(100),
            ..AppConfig::default()
        };
        let state = AppState::with_store(config, TokenVerifier::new("secret").unwrap(), Arc::new(store.clone())).await;
        let host = principal("host");
        let id = running_poll(&state, &host).await;
        let code = get_chat_poll(&state, &id).await.unwrap().code;
        store.delay_writes_to("codes", Duration::from_millis(300));

        let closed = close(&state, &id, &host).await.unwrap();
        assert_eq!(closed.status, PollStatus::Finished);
        assert_eq!(closed.finish_reason, Some(FinishReason::Completed));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let shared = state.store().await.unwrap();
        assert!(matches!(
            join_code::resolve(&shared, &code).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
