use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::{validate_not_blank, validate_options, validate_time_limit},
    state::quiz::{AnswerKey, GameMode, PublicQuestion},
};

/// Payload used by a host to create a quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: GameMode,
    /// Snapshotted at creation; immutable for the whole session.
    #[validate(length(min = 1, max = 200), nested)]
    pub questions: Vec<QuestionInput>,
}

fn default_mode() -> GameMode {
    GameMode::Classic
}

/// Question as authored, including its correct option.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub text: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_answer: u32,
    /// Seconds.
    pub time_limit: u32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_not_blank(&self.text) {
            errors.add("text", e);
        }
        if let Err(e) = validate_options(&self.options) {
            errors.add("options", e);
        }
        if self.correct_answer as usize >= self.options.len() {
            let mut e = validator::ValidationError::new("correct_answer_range");
            e.message = Some("correct answer must index one of the options".into());
            errors.add("correct_answer", e);
        }
        if let Err(e) = validate_time_limit(self.time_limit) {
            errors.add("time_limit", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl CreateQuizRequest {
    /// Split the authored questions into what players see and the answer key.
    pub fn split_questions(&self) -> (Vec<PublicQuestion>, AnswerKey) {
        let public = self
            .questions
            .iter()
            .map(|question| PublicQuestion {
                text: question.text.clone(),
                options: question.options.clone(),
                time_limit: question.time_limit,
                image_url: question.image_url.clone(),
            })
            .collect();
        let correct = self
            .questions
            .iter()
            .map(|question| question.correct_answer)
            .collect();
        (public, AnswerKey { correct })
    }
}

/// Host request to put a question live.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    /// Must be the index right after the current one.
    pub question_index: u32,
}

/// A player's answer. Correctness is decided by the server.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub question_index: u32,
    pub selected_option: u32,
    /// Seconds measured by the client; never trusted below the server clock.
    pub time_spent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub accepted: bool,
    pub is_correct: bool,
    pub points_earned: i64,
    /// Time the answer was charged with, in seconds.
    pub time_spent: f64,
}

/// A question put live by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStartedResponse {
    pub question_index: u32,
    /// Server timestamp every client derives its countdown from.
    pub question_started_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CountdownQuery {
    /// Whether the client sees this question start for the first time.
    #[serde(default)]
    pub first: bool,
}
