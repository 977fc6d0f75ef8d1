//! Live session documents over SSE.
//!
//! Each stream is a store [`Subscription`] on the session document, forwarded
//! by a task that also owns the viewer's presence: the viewer is flagged
//! connected when a stream opens and disconnected once their last one ends.

use std::{convert::Infallible, pin::pin, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dao::{
        layout,
        models::SessionKind,
        session_store::{Subscription, subscribe},
    },
    dto::sse::{CLOSED_EVENT, SNAPSHOT_EVENT, ServerEvent, SessionClosed},
    error::ServiceError,
    services::{identity::Principal, presence},
    state::{SharedState, quiz::QuizDocument},
};

/// Who is watching which session.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub kind: SessionKind,
    pub session_id: String,
    pub principal: Principal,
}

/// Open a live stream of the session document for `viewer`.
pub async fn open(
    state: &SharedState,
    viewer: Viewer,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let store = state.store().await?;
    let document = layout::session(viewer.kind, &viewer.session_id)?;
    if store.read(document.field("status")).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "session `{}` not found",
            viewer.session_id
        )));
    }

    let subscription = subscribe(&store, document.root());
    state
        .streams()
        .opened(viewer.kind, &viewer.session_id, &viewer.principal.user_id);
    set_presence(state, &viewer, true).await;
    info!(session_id = %viewer.session_id, user_id = %viewer.principal.user_id, "session stream opened");

    Ok(to_sse_stream(state.clone(), viewer, subscription))
}

/// Render a stored session document for `viewer`.
pub fn snapshot(viewer: &Viewer, document: Value) -> serde_json::Result<ServerEvent> {
    let event = Some(SNAPSHOT_EVENT.to_string());
    match viewer.kind {
        SessionKind::Quiz => {
            let quiz = serde_json::from_value::<QuizDocument>(document)?;
            ServerEvent::json(event, &quiz.view_for(&viewer.principal.user_id))
        }
        SessionKind::Tournament | SessionKind::Poll => ServerEvent::json(event, &document),
    }
}

fn closed(viewer: &Viewer, reason: &str) -> serde_json::Result<ServerEvent> {
    ServerEvent::json(
        Some(CLOSED_EVENT.to_string()),
        &SessionClosed {
            session_id: viewer.session_id.clone(),
            reason: reason.to_string(),
        },
    )
}

async fn send_closed(tx: &mpsc::Sender<Result<Event, Infallible>>, viewer: &Viewer, reason: &str) {
    if let Ok(payload) = closed(viewer, reason) {
        let _ = tx.send(Ok(to_event(payload))).await;
    }
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

fn to_sse_stream(
    state: SharedState,
    viewer: Viewer,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let mut updates = pin!(subscription.into_stream());
        let mut degraded = state.degraded_watcher();
        loop {
            let update = tokio::select! {
                _ = tx.closed() => break,
                Ok(()) = degraded.changed() => {
                    if *degraded.borrow_and_update() {
                        send_closed(&tx, &viewer, "unavailable").await;
                        break;
                    }
                    continue;
                }
                update = updates.next() => update,
            };

            let payload = match update {
                Some(Ok(Some(document))) => snapshot(&viewer, document),
                Some(Ok(None)) => {
                    send_closed(&tx, &viewer, "deleted").await;
                    break;
                }
                Some(Err(err)) => {
                    warn!(session_id = %viewer.session_id, error = %err, "session stream read failed");
                    send_closed(&tx, &viewer, "unavailable").await;
                    break;
                }
                None => break,
            };

            match payload {
                Ok(payload) => {
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(session_id = %viewer.session_id, error = %err, "skipping malformed session snapshot"),
            }
        }

        let remaining = state
            .streams()
            .closed(viewer.kind, &viewer.session_id, &viewer.principal.user_id);
        if remaining == 0 {
            set_presence(&state, &viewer, false).await;
        }
        info!(session_id = %viewer.session_id, user_id = %viewer.principal.user_id, "session stream closed");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn set_presence(state: &SharedState, viewer: &Viewer, connected: bool) {
    let outcome = match state.store().await {
        Ok(store) => presence::set_connected(
            &store,
            viewer.kind,
            &viewer.session_id,
            &viewer.principal.user_id,
            connected,
        )
        .await
        .map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    if let Err(error) = outcome {
        warn!(session_id = %viewer.session_id, user_id = %viewer.principal.user_id, connected, %error, "presence update failed");
    }
}
