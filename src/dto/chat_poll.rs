use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_not_blank;

/// Payload used by a host to create a two-option chat poll.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatPollRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[validate(length(min = 1, max = 500), custom(function = "validate_not_blank"))]
    pub question: String,
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub option1: String,
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub option2: String,
}

/// A chat line. Its maximum length comes from the server configuration.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatMessageRequest {
    pub body: String,
}
