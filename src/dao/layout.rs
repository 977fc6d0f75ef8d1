//! Where each session kind keeps its documents.
//!
//! Every live session is a single document so that any batch touching it is
//! atomic; data that must not reach players (answer keys) and data that
//! outlives the session (archives, join codes) live in separate collections.

use crate::dao::{models::SessionKind, path::DocumentRef, storage::StorageResult};

pub const QUIZZES: &str = "quiz";
pub const ANSWER_KEYS: &str = "answerKeys";
pub const TOURNAMENTS: &str = "tournament";
pub const CHAT_POLLS: &str = "poll";
pub const JOIN_CODES: &str = "codes";
pub const ARCHIVES: &str = "archives";

/// Live quiz session document.
pub fn quiz(session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(QUIZZES, session_id)
}

/// Correct option indices of a quiz, never served to clients.
pub fn answer_key(session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(ANSWER_KEYS, session_id)
}

pub fn tournament(session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(TOURNAMENTS, session_id)
}

pub fn chat_poll(session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(CHAT_POLLS, session_id)
}

/// Live document of a session of any kind.
pub fn session(kind: SessionKind, session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(kind.collection(), session_id)
}

/// Reservation of a join code among active sessions.
pub fn join_code(code: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(JOIN_CODES, code)
}

/// Immutable summary of a finished quiz.
pub fn archive(session_id: &str) -> StorageResult<DocumentRef> {
    DocumentRef::new(ARCHIVES, session_id)
}
