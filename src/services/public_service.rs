//! Read-only lookups open to anyone holding a join code or a session id.

use crate::{
    dao::models::ArchiveSummary,
    dto::common::JoinCodeResponse,
    error::ServiceError,
    services::{archive, join_code},
    state::SharedState,
};

/// Return the active session a join code designates.
pub async fn resolve_code(state: &SharedState, code: &str) -> Result<JoinCodeResponse, ServiceError> {
    let store = state.store().await?;
    let reservation = join_code::resolve(&store, code.trim()).await?;
    Ok(reservation.into())
}

/// Return the summary archived when a quiz finished.
pub async fn get_archive(state: &SharedState, session_id: &str) -> Result<ArchiveSummary, ServiceError> {
    let store = state.store().await?;
    archive::load_summary(&store, session_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::SessionKind, session_store::memory::MemorySessionStore},
        services::identity::TokenVerifier,
        state::AppState,
    };

    #[tokio::test]
    async fn codes_resolve_to_their_session() {
        let state = AppState::with_store(
            AppConfig::default(),
            TokenVerifier::new("secret").unwrap(),
            Arc::new(MemorySessionStore::new()),
        )
        .await;
        let store = state.store().await.unwrap();
        let code = join_code::reserve(&store, SessionKind::Poll, "p1", 8).await.unwrap();

        let found = resolve_code(&state, &format!(" {code} ")).await.unwrap();
        assert_eq!(found.kind, SessionKind::Poll);
        assert_eq!(found.session_id, "p1");

        assert!(matches!(resolve_code(&state, "12ab56").await, Err(ServiceError::Validation(_))));
        assert!(matches!(get_archive(&state, "p1").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn lookups_fail_in_degraded_mode() {
        let state = AppState::new(AppConfig::default(), TokenVerifier::new("secret").unwrap());
        assert!(matches!(resolve_code(&state, "123456").await, Err(ServiceError::Degraded)));
    }
}
