/// Canonical document locations for every session kind.
pub mod layout;
/// Store-level records shared by several session kinds.
pub mod models;
/// Document and path addressing.
pub mod path;
/// Session store trait and backends.
pub mod session_store;
/// Storage abstraction layer errors.
pub mod storage;
