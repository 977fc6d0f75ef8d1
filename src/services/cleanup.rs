//! Best-effort work run once a session is finished: none of it may hold up
//! or undo the finish transition, failures are logged only.

use tracing::{info, warn};

use crate::{
    dao::{path::DocumentRef, session_store::WriteBatch},
    services::join_code,
    state::SharedState,
};

/// Give the join code back to the pool.
pub async fn release_code(state: &SharedState, code: &str, session_id: &str) {
    let outcome = match state.store().await {
        Ok(store) => join_code::release(&store, code, session_id).await.map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    if let Err(error) = outcome {
        warn!(session_id, code, %error, "failed to release join code");
    }
}

/// Delete `documents` after the configured grace period, on a detached task.
pub fn schedule_purge(state: &SharedState, session_id: &str, documents: Vec<DocumentRef>) {
    let state = state.clone();
    let session_id = session_id.to_string();
    let grace = state.purge_grace();

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;

        let store = match state.store().await {
            Ok(store) => store,
            Err(err) => {
                warn!(session_id, error = %err, "skipping session purge");
                return;
            }
        };

        for document in documents {
            let batch = WriteBatch::new(document.clone()).delete(document.root());
            match store.write_atomic(batch).await {
                Ok(()) => info!(session_id, document = %document, "purged finished session document"),
                Err(err) => warn!(session_id, document = %document, error = %err, "failed to purge session document"),
            }
        }
    });
}
