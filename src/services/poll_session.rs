//! Operations shared by the two poll-like sessions, tournaments and chat polls:
//! membership, the append-only message log and the finish transition.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        path::DocumentRef,
        session_store::{SharedStore, WriteBatch, encode, read_as},
        storage::{ConflictKind, StorageError},
    },
    error::ServiceError,
    services::{cleanup, identity::Principal},
    state::{
        SharedState, Transition,
        chat::{ChatMessage, MessageKind, Participant, message_key},
        now_millis,
        state_machine::{FinishReason, PollEvent, PollStatus},
    },
};

const JOIN_ATTEMPTS: u32 = 3;

pub(crate) async fn current_status(store: &SharedStore, document: &DocumentRef) -> Result<PollStatus, ServiceError> {
    read_as::<PollStatus>(store, document.field("status"))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{}` not found", document.key())))
}

/// Add `principal` to the participants; returns whether it already was one.
pub(crate) async fn add_participant(
    store: &SharedStore,
    document: &DocumentRef,
    principal: &Principal,
) -> Result<bool, ServiceError> {
    let path = document.field("participants").field(&principal.user_id);

    for _ in 0..JOIN_ATTEMPTS {
        let status = current_status(store, document).await?;
        if status.is_terminal() {
            return Err(ServiceError::InvalidTransition(format!(
                "session `{}` is finished",
                document.key()
            )));
        }

        let participant = Participant {
            user_id: principal.user_id.clone(),
            display_name: principal.display_name.clone(),
            connected: true,
            joined_at: now_millis(),
        };
        let batch = WriteBatch::new(document.clone())
            .expect(document.field("status"), status.as_str())
            .create(path.clone(), encode(&path, &participant)?);

        match store.write_atomic(batch).await {
            Ok(()) => {
                info!(session_id = document.key(), user_id = %principal.user_id, "participant joined");
                return Ok(false);
            }
            Err(StorageError::Conflict {
                kind: ConflictKind::AlreadyExists,
                ..
            }) => return Ok(true),
            Err(StorageError::Conflict { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidTransition(format!(
        "session `{}` kept changing while joining",
        document.key()
    )))
}

/// Trim a chat line and check it against the configured maximum length.
pub(crate) fn message_body(body: &str, max_len: usize) -> Result<String, ServiceError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ServiceError::Validation("message must not be empty".into()));
    }
    if body.chars().count() > max_len {
        return Err(ServiceError::Validation(format!(
            "message exceeds {max_len} characters"
        )));
    }
    Ok(body.to_string())
}

/// Append a message to the log of a session that is still live.
pub(crate) async fn append_message(
    store: &SharedStore,
    document: &DocumentRef,
    author: &Principal,
    body: String,
    kind: MessageKind,
) -> Result<ChatMessage, ServiceError> {
    let message = ChatMessage {
        author_id: author.user_id.clone(),
        author_name: author.display_name.clone(),
        timestamp: now_millis(),
        body,
        kind,
    };
    let key = message_key(message.timestamp, &Uuid::new_v4().simple().to_string());
    let path = document.field("messages").field(key);

    let batch = WriteBatch::new(document.clone())
        .expect_present(document.field("status"))
        .create(path.clone(), encode(&path, &message)?);
    match store.write_atomic(batch).await {
        Err(StorageError::Conflict {
            kind: ConflictKind::Missing,
            ..
        }) => Err(ServiceError::NotFound(format!(
            "session `{}` not found",
            document.key()
        ))),
        other => other.map(|()| message).map_err(Into::into),
    }
}

/// Best-effort vote annotation: the tally is already committed, so a failed
/// append is only logged.
pub(crate) async fn annotate_vote(store: &SharedStore, document: &DocumentRef, voter: &Principal, label: &str) {
    let body = format!("voted for {label}");
    if let Err(err) = append_message(store, document, voter, body, MessageKind::Vote).await {
        warn!(session_id = document.key(), user_id = %voter.user_id, error = %err, "vote annotation not appended");
    }
}

/// Add the finish transition from `current` to `batch`.
pub(crate) fn finishing(
    batch: WriteBatch,
    document: &DocumentRef,
    current: PollStatus,
    reason: FinishReason,
    finished_at: i64,
) -> Result<WriteBatch, ServiceError> {
    let next = current.next(PollEvent::Finish(reason))?;
    let reason_path = document.field("finishReason");
    Ok(batch
        .expect(document.field("status"), current.as_str())
        .set(document.field("status"), next.as_str())
        .set(document.field("finishedAt"), finished_at)
        .set(reason_path.clone(), encode(&reason_path, &reason)?))
}

/// Complete a committed finish: release the code and schedule the purge,
/// then hand `finished` back as the command's value.
pub(crate) fn after_finish<T: Clone + Send + 'static>(
    state: &SharedState,
    document: &DocumentRef,
    code: &str,
    finished: T,
) -> Transition<T> {
    let state = state.clone();
    let document = document.clone();
    let code = code.to_string();
    Transition::Committed {
        committed: finished.clone(),
        follow_up: Box::pin(async move {
            cleanup::release_code(&state, &code, document.key()).await;
            cleanup::schedule_purge(&state, document.key(), vec![document.clone()]);
            finished
        }),
    }
}

/// Move a waiting session to `active`.
pub(crate) async fn activate(store: &SharedStore, document: &DocumentRef, current: PollStatus) -> Result<(), ServiceError> {
    let next = current.next(PollEvent::Start)?;
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("status"), current.as_str())
        .set(document.field("status"), next.as_str());
    store.write_atomic(batch).await?;
    info!(session_id = document.key(), "session started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    fn principal(id: &str) -> Principal {
        Principal {
            user_id: id.into(),
            display_name: id.to_uppercase(),
        }
    }

    async fn seeded(status: &str) -> (SharedStore, DocumentRef) {
        let store: SharedStore = Arc::new(MemorySessionStore::new());
        let document = DocumentRef::new("poll", "p1").unwrap();
        store.set(document.field("status"), json!(status)).await.unwrap();
        (store, document)
    }

    #[test]
    fn message_bodies_are_trimmed_and_bounded() {
        assert_eq!(message_body("  hi  ", 5).unwrap(), "hi");
        assert!(message_body("   ", 5).is_err());
        assert!(message_body("héllo!", 5).is_err());
        assert!(message_body("héllo", 5).is_ok());
    }

    #[tokio::test]
    async fn joining_a_finished_session_is_refused() {
        let (store, document) = seeded("finished").await;
        let outcome = add_participant(&store, &document, &principal("ada")).await;
        assert!(matches!(outcome, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn second_join_reports_a_rejoin() {
        let (store, document) = seeded("waiting").await;
        assert!(!add_participant(&store, &document, &principal("ada")).await.unwrap());
        assert!(add_participant(&store, &document, &principal("ada")).await.unwrap());
    }

    #[tokio::test]
    async fn messages_need_an_existing_session() {
        let (store, _) = seeded("active").await;
        let missing = DocumentRef::new("poll", "gone").unwrap();
        let outcome = append_message(&store, &missing, &principal("ada"), "hi".into(), MessageKind::Chat).await;
        assert!(matches!(outcome, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn messages_are_appended_to_the_log() {
        let (store, document) = seeded("active").await;
        for body in ["first", "second", "third"] {
            append_message(&store, &document, &principal("ada"), body.into(), MessageKind::Chat)
                .await
                .unwrap();
        }

        let log = read_as::<std::collections::BTreeMap<String, ChatMessage>>(&store, document.field("messages"))
            .await
            .unwrap()
            .unwrap();
        let mut bodies = log.values().map(|m| m.body.as_str()).collect::<Vec<_>>();
        bodies.sort_unstable();
        assert_eq!(bodies, vec!["first", "second", "third"]);
        assert!(log.keys().all(|key| key.len() > 14));
    }
}
