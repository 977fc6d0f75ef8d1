//! Connection flags of session members, driven by their live streams.

use dashmap::DashMap;
use tracing::debug;

use crate::dao::{
    layout,
    models::SessionKind,
    session_store::{SharedStore, WriteBatch},
    storage::{StorageError, StorageResult},
};

/// Field holding the members of a session of `kind`.
pub fn members_field(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Quiz => "players",
        SessionKind::Tournament | SessionKind::Poll => "participants",
    }
}

/// Live streams held open per session member, so a member with several tabs
/// stays connected until the last one closes.
#[derive(Debug, Default)]
pub struct StreamCounts {
    open: DashMap<(SessionKind, String, String), usize>,
}

impl StreamCounts {
    /// Record a new stream; returns how many the member now holds.
    pub fn opened(&self, kind: SessionKind, session_id: &str, user_id: &str) -> usize {
        let mut count = self
            .open
            .entry((kind, session_id.to_string(), user_id.to_string()))
            .or_default();
        *count += 1;
        *count
    }

    /// Record a closed stream; returns how many the member still holds.
    pub fn closed(&self, kind: SessionKind, session_id: &str, user_id: &str) -> usize {
        let key = (kind, session_id.to_string(), user_id.to_string());
        if let Some(mut count) = self.open.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        match self.open.remove_if(&key, |_, count| *count == 0) {
            Some(_) => 0,
            None => self.open.get(&key).map(|count| *count).unwrap_or(0),
        }
    }
}

/// Flag `user_id` as (dis)connected. A user who never joined is left alone.
pub async fn set_connected(
    store: &SharedStore,
    kind: SessionKind,
    session_id: &str,
    user_id: &str,
    connected: bool,
) -> StorageResult<()> {
    let document = layout::session(kind, session_id)?;
    let member = document.field(members_field(kind)).field(user_id);
    let batch = WriteBatch::new(document)
        .expect_present(member.clone())
        .set(member.field("connected"), connected);

    match store.write_atomic(batch).await {
        Err(StorageError::Conflict { .. }) => {
            debug!(session_id, user_id, "presence update for a non-member ignored");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    #[tokio::test]
    async fn only_members_get_a_connection_flag() {
        let store: SharedStore = Arc::new(MemorySessionStore::new());
        let document = layout::quiz("q1").unwrap();
        store
            .set(document.field("players").field("u1"), json!({"userId": "u1"}))
            .await
            .unwrap();

        set_connected(&store, SessionKind::Quiz, "q1", "u1", true).await.unwrap();
        set_connected(&store, SessionKind::Quiz, "q1", "ghost", true).await.unwrap();

        let players = store.read(document.field("players")).await.unwrap().unwrap();
        assert_eq!(players, json!({"u1": {"userId": "u1", "connected": true}}));
    }

    #[test]
    fn member_stays_counted_until_the_last_stream_closes() {
        let streams = StreamCounts::default();
        assert_eq!(streams.opened(SessionKind::Quiz, "q1", "u1"), 1);
        assert_eq!(streams.opened(SessionKind::Quiz, "q1", "u1"), 2);
        assert_eq!(streams.opened(SessionKind::Poll, "q1", "u1"), 1);

        assert_eq!(streams.closed(SessionKind::Quiz, "q1", "u1"), 1);
        assert_eq!(streams.closed(SessionKind::Quiz, "q1", "u1"), 0);
        assert_eq!(streams.closed(SessionKind::Quiz, "q1", "u1"), 0);
        assert_eq!(streams.closed(SessionKind::Poll, "q1", "u1"), 0);
        assert!(streams.open.is_empty());
    }
}
