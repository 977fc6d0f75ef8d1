use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Installed session store backend, absent while degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl HealthResponse {
    pub fn ok(backend: &str) -> Self {
        Self {
            status: "ok".to_string(),
            backend: Some(backend.to_string()),
        }
    }

    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            backend: None,
        }
    }
}
