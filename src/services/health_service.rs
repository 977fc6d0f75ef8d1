use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether a session store is installed and answering.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store = match state.store().await {
        Ok(store) => store,
        Err(_) => {
            warn!("session store unavailable (degraded mode)");
            return HealthResponse::degraded();
        }
    };

    if let Err(err) = store.health_check().await {
        warn!(backend = store.backend_name(), error = %err, "session store health check failed");
    }

    if state.is_degraded().await {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok(store.backend_name())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore,
        services::identity::TokenVerifier, state::AppState,
    };

    #[tokio::test]
    async fn reports_the_installed_backend() {
        let state = AppState::new(AppConfig::default(), TokenVerifier::new("s").unwrap());
        assert_eq!(health_status(&state).await.status, "degraded");

        state.set_store(Arc::new(MemorySessionStore::new())).await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.backend.as_deref(), Some("memory"));
    }
}
