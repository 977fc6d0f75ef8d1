pub mod chat_poll;
pub mod common;
pub mod health;
pub mod quiz;
pub mod sse;
pub mod tournament;
pub mod validation;
