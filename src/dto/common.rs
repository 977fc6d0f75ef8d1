use serde::Serialize;
use utoipa::ToSchema;

use crate::dao::models::{CodeReservation, SessionKind};

/// Returned when a host creates any kind of session.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedResponse {
    pub id: String,
    /// Six-digit code participants enter to join.
    pub code: String,
    pub kind: SessionKind,
}

/// Session designated by a join code.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinCodeResponse {
    pub kind: SessionKind,
    pub session_id: String,
}

impl From<CodeReservation> for JoinCodeResponse {
    fn from(reservation: CodeReservation) -> Self {
        Self {
            kind: reservation.kind,
            session_id: reservation.session_id,
        }
    }
}

/// Outcome of joining a session.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub session_id: String,
    pub user_id: String,
    /// The principal was already a member; its existing record was kept.
    pub rejoined: bool,
}
