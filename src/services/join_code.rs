//! Six-digit join codes, unique among active sessions.
//!
//! A code is reserved by creating `codes/{code}`; the create fails if another
//! active session already holds it, in which case a new code is drawn.

use rand::Rng;
use tracing::{debug, warn};

use crate::{
    dao::{
        layout,
        models::{CodeReservation, SessionKind},
        session_store::{SharedStore, WriteBatch, encode, read_as},
        storage::StorageError,
    },
    error::ServiceError,
    state::now_millis,
};

const CODE_LEN: usize = 6;

fn random_code() -> String {
    // No leading zero, so the code reads the same when dictated as a number.
    rand::rng().random_range(100_000..1_000_000).to_string()
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Reserve a fresh random code for `session_id`.
pub async fn reserve(
    store: &SharedStore,
    kind: SessionKind,
    session_id: &str,
    attempts: u32,
) -> Result<String, ServiceError> {
    reserve_with(store, kind, session_id, attempts, random_code).await
}

pub(crate) async fn reserve_with<G>(
    store: &SharedStore,
    kind: SessionKind,
    session_id: &str,
    attempts: u32,
    mut next_code: G,
) -> Result<String, ServiceError>
where
    G: FnMut() -> String,
{
    let reservation = CodeReservation {
        kind,
        session_id: session_id.to_string(),
        reserved_at: now_millis(),
    };

    for attempt in 1..=attempts {
        let code = next_code();
        let document = layout::join_code(&code)?;
        let root = document.root();
        let batch = WriteBatch::new(document).create(root.clone(), encode(&root, &reservation)?);

        match store.write_atomic(batch).await {
            Ok(()) => return Ok(code),
            Err(err @ StorageError::Conflict { .. }) => {
                debug!(attempt, error = %err, "join code collision, drawing another");
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(session_id, attempts, "no free join code found");
    Err(ServiceError::CodeSpaceExhausted)
}

/// Free `code` if it still belongs to `session_id`.
pub async fn release(store: &SharedStore, code: &str, session_id: &str) -> Result<(), StorageError> {
    let document = layout::join_code(code)?;
    let batch = WriteBatch::new(document.clone())
        .expect(document.field("sessionId"), session_id)
        .delete(document.root());

    match store.write_atomic(batch).await {
        // Already released, or reassigned to a newer session.
        Err(StorageError::Conflict { .. }) => Ok(()),
        other => other,
    }
}

/// Look up which active session a code designates.
pub async fn resolve(store: &SharedStore, code: &str) -> Result<CodeReservation, ServiceError> {
    if !is_well_formed(code) {
        return Err(ServiceError::Validation(format!(
            "join code must be {CODE_LEN} digits"
        )));
    }

    read_as::<CodeReservation>(store, layout::join_code(code)?.root())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no active session uses code {code}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    fn store() -> SharedStore {
        Arc::new(MemorySessionStore::new())
    }

    #[test]
    fn random_codes_have_six_digits() {
        for _ in 0..100 {
            assert!(is_well_formed(&random_code()));
        }
    }

    #[tokio::test]
    async fn colliding_codes_are_redrawn() {
        let store = store();
        let first = reserve_with(&store, SessionKind::Quiz, "q1", 4, || "123456".into())
            .await
            .unwrap();
        assert_eq!(first, "123456");

        let mut candidates = vec!["654321".to_string(), "123456".to_string()];
        let second = reserve_with(&store, SessionKind::Poll, "p1", 4, move || {
            candidates.pop().unwrap_or_default()
        })
        .await
        .unwrap();
        assert_eq!(second, "654321");

        let resolved = resolve(&store, "654321").await.unwrap();
        assert_eq!(resolved.kind, SessionKind::Poll);
        assert_eq!(resolved.session_id, "p1");
    }

    #[tokio::test]
    async fn exhausted_code_space_is_reported() {
        let store = store();
        reserve_with(&store, SessionKind::Quiz, "q1", 1, || "111111".into())
            .await
            .unwrap();
        let err = reserve_with(&store, SessionKind::Quiz, "q2", 3, || "111111".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::CodeSpaceExhausted));
    }

    #[tokio::test]
    async fn release_only_frees_own_code() {
        let store = store();
        reserve_with(&store, SessionKind::Quiz, "q1", 1, || "222222".into())
            .await
            .unwrap();

        release(&store, "222222", "someone-else").await.unwrap();
        assert!(resolve(&store, "222222").await.is_ok());

        release(&store, "222222", "q1").await.unwrap();
        assert!(matches!(
            resolve(&store, "222222").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn malformed_codes_are_validation_errors() {
        assert!(matches!(
            resolve(&store(), "12ab56").await,
            Err(ServiceError::Validation(_))
        ));
    }
}
