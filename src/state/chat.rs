//! Chat-poll aggregate plus the participant, vote and message records it
//! shares with tournaments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::state_machine::{FinishReason, PollStatus};

/// A voter or chatter of a poll-like session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub connected: bool,
    pub joined_at: i64,
}

/// Which of two options a voter picked, recorded once per voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    /// `1` or `2`.
    pub choice: u8,
    pub voted_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    /// Generated when a vote is accepted, so the log shows who voted.
    Vote,
}

/// Entry of the append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub author_id: String,
    pub author_name: String,
    pub timestamp: i64,
    pub body: String,
    pub kind: MessageKind,
}

/// Log key that sorts in append order: zero-padded timestamp plus a unique suffix.
pub fn message_key(timestamp: i64, unique: &str) -> String {
    format!("{:013}-{unique}", timestamp.max(0))
}

/// A two-option poll with a live chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatPollDocument {
    pub id: String,
    pub code: String,
    pub title: String,
    pub question: String,
    pub option1: String,
    pub option2: String,
    pub host_id: String,
    pub status: PollStatus,
    #[serde(default)]
    pub votes1: i64,
    #[serde(default)]
    pub votes2: i64,
    #[serde(default)]
    pub voted_users: BTreeMap<String, VoteRecord>,
    #[serde(default)]
    pub participants: BTreeMap<String, Participant>,
    #[serde(default)]
    pub messages: BTreeMap<String, ChatMessage>,
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl ChatPollDocument {
    /// Leading option, `None` on a tie.
    pub fn leader(&self) -> Option<u8> {
        match self.votes1.cmp(&self.votes2) {
            std::cmp::Ordering::Greater => Some(1),
            std::cmp::Ordering::Less => Some(2),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_keys_sort_chronologically() {
        let mut keys = vec![
            message_key(1_700_000_000_123, "b"),
            message_key(999, "a"),
            message_key(1_700_000_000_123, "a"),
        ];
        keys.sort();
        assert_eq!(keys[0], "0000000000999-a");
        assert!(keys[1] < keys[2]);
    }
}
