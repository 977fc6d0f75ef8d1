use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::validate_not_blank,
    state::bracket::{Contestant, MatchStatus},
};

/// Payload used by a host to create a tournament poll.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTournamentRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    /// At least two contestants; shuffled before pairing.
    #[validate(length(min = 2, max = 256), nested)]
    pub items: Vec<ContestantInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContestantInput {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2048))]
    pub image_url: Option<String>,
}

impl From<ContestantInput> for Contestant {
    fn from(input: ContestantInput) -> Self {
        Self {
            name: input.name,
            image_url: input.image_url,
        }
    }
}

/// A voter's choice on one match.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// `1` for the first slot, `2` for the second.
    #[validate(range(min = 1, max = 2))]
    pub choice: u8,
}

/// Outcome of a host completing the current match.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResultResponse {
    pub round: u32,
    pub match_index: u32,
    pub winner: Contestant,
    pub votes1: i64,
    pub votes2: i64,
    /// Set once the bracket produced its overall winner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub champion: Option<Contestant>,
    /// Match the bracket moved to, absent once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<MatchPointer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchPointer {
    pub round: u32,
    pub match_index: u32,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub accepted: bool,
    pub choice: u8,
}
