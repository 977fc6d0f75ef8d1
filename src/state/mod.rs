pub mod bracket;
pub mod chat;
pub mod quiz;
pub mod state_machine;

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    config::AppConfig,
    dao::session_store::SharedStore,
    error::ServiceError,
    services::{identity::TokenVerifier, presence::StreamCounts},
};

pub type SharedState = Arc<AppState>;

/// Work a host command leaves behind once its transition committed.
pub type FollowUp<T> = BoxFuture<'static, T>;

/// Result of the committing part of a host command.
pub enum Transition<T> {
    /// Nothing left to do.
    Done(T),
    /// The transition committed; `follow_up` completes the command and yields
    /// its final value, `committed` stands in for it if it runs late.
    Committed {
        /// Value as of the commit.
        committed: T,
        /// Post-commit work yielding the final value.
        follow_up: FollowUp<T>,
    },
}

/// Milliseconds since the Unix epoch; the server clock is authoritative for
/// every timestamp stored in a session.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Central application state: the storage slot, configuration and the
/// per-session gates serializing host commands.
pub struct AppState {
    store: RwLock<Option<SharedStore>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    tokens: TokenVerifier,
    host_gates: DashMap<String, Arc<Mutex<()>>>,
    streams: StreamCounts,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, tokens: TokenVerifier) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            tokens,
            host_gates: DashMap::new(),
            streams: StreamCounts::default(),
        })
    }

    /// Build a state with `store` already installed (single-node setups and tests).
    pub async fn with_store(config: AppConfig, tokens: TokenVerifier, store: SharedStore) -> SharedState {
        let state = Self::new(config, tokens);
        state.set_store(store).await;
        state
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn store(&self) -> Result<SharedStore, ServiceError> {
        self.store.read().await.clone().ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_store(&self, store: SharedStore) {
        *self.store.write().await = Some(store);
        self.update_degraded(false).await;
    }

    /// Drop the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        self.store.write().await.take();
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    /// Open live streams per session member.
    pub fn streams(&self) -> &StreamCounts {
        &self.streams
    }

    fn host_gate(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.host_gates
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop `gate` from the map once nobody but the map and the caller holds it.
    fn retire_host_gate(&self, session_id: &str, gate: &Arc<Mutex<()>>) {
        self.host_gates.remove_if(session_id, |_, current| {
            Arc::ptr_eq(current, gate) && Arc::strong_count(current) <= 2
        });
    }

    /// Number of sessions with a host command running or queued.
    pub fn active_host_gates(&self) -> usize {
        self.host_gates.len()
    }

    /// Run `body` while holding the host gate of `session_id`.
    ///
    /// Gates only live while commands use them, so ids that never name a
    /// session and sessions abandoned mid-game leave nothing behind.
    async fn with_host_gate<Fut, T>(&self, session_id: &str, body: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.host_gate(session_id);
        let outcome = match timeout(self.config.transition_timeout, gate.lock()).await {
            Ok(_guard) => body.await,
            Err(_) => {
                warn!(session_id, "host command gate still busy after timeout");
                Err(ServiceError::Timeout)
            }
        };
        self.retire_host_gate(session_id, &gate);
        outcome
    }

    async fn bounded<Fut, T>(&self, session_id: &str, work: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let limit = self.config.transition_timeout;
        match timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(session_id, timeout_ms = limit.as_millis() as u64, "host command timed out");
                Err(ServiceError::Timeout)
            }
        }
    }

    /// Run a host lifecycle command for `session_id`.
    ///
    /// Commands on the same session are serialized, so the host is the single
    /// writer of status transitions even with several host tabs open, and each
    /// command is bounded by the configured transition timeout.
    pub async fn run_host_command<F, Fut, T>(&self, session_id: &str, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.with_host_gate(session_id, self.bounded(session_id, work()))
            .await
    }

    /// Run a host command whose transition may leave follow-up work behind.
    ///
    /// Only `work` is bounded by the transition timeout. A follow-up runs on its
    /// own task, so it completes even when the caller stops waiting; the gate is
    /// held until it ends or the timeout elapses again, and in the latter case
    /// the committed value is returned.
    pub async fn run_host_transition<F, Fut, T>(&self, session_id: &str, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Transition<T>, ServiceError>>,
        T: Send + 'static,
    {
        self.with_host_gate(session_id, async {
            let (committed, follow_up) = match self.bounded(session_id, work()).await? {
                Transition::Done(value) => return Ok(value),
                Transition::Committed { committed, follow_up } => (committed, follow_up),
            };

            let limit = self.config.transition_timeout;
            match timeout(limit, tokio::spawn(follow_up)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    warn!(session_id, error = %err, "host command follow-up aborted");
                    Ok(committed)
                }
                Err(_) => {
                    warn!(session_id, "host command follow-up still running after the transition committed");
                    Ok(committed)
                }
            }
        })
        .await
    }

    /// Delay applied before a finished session document is purged.
    pub fn purge_grace(&self) -> Duration {
        self.config.purge_grace
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    fn config() -> AppConfig {
        AppConfig {
            transition_timeout: Duration::from_millis(50),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(config(), TokenVerifier::new("s").unwrap());
        assert!(state.is_degraded().await);
        assert!(matches!(state.store().await, Err(ServiceError::Degraded)));

        state.set_store(Arc::new(MemorySessionStore::new())).await;
        assert!(!state.is_degraded().await);
        assert!(state.store().await.is_ok());

        state.clear_store().await;
        assert!(state.is_degraded().await);
    }

    #[tokio::test]
    async fn host_commands_time_out() {
        let state = AppState::new(config(), TokenVerifier::new("s").unwrap());
        let outcome: Result<(), _> = state
            .run_host_command("q1", || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome, Err(ServiceError::Timeout)));
    }

    #[tokio::test]
    async fn host_commands_on_one_session_are_serialized() {
        let state = AppState::new(
            AppConfig::default(),
            TokenVerifier::new("s").unwrap(),
        );
        let running = Arc::new(AtomicU32::new(0));

        let tasks = (0..8).map(|_| {
            let state = state.clone();
            let running = running.clone();
            tokio::spawn(async move {
                state
                    .run_host_command("q1", || async move {
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ServiceError>(())
                    })
                    .await
            })
        });

        for task in tasks.collect::<Vec<_>>() {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn gates_do_not_outlive_their_commands() {
        let state = AppState::new(config(), TokenVerifier::new("s").unwrap());
        for i in 0..100 {
            let outcome: Result<(), _> = state
                .run_host_command(&format!("missing{i}"), || async {
                    Err(ServiceError::NotFound("no such session".into()))
                })
                .await;
            assert!(matches!(outcome, Err(ServiceError::NotFound(_))));
        }
        let outcome: Result<(), _> = state.run_host_command("q1", || async { Ok(()) }).await;
        assert!(outcome.is_ok());
        assert_eq!(state.active_host_gates(), 0);
    }

    #[tokio::test]
    async fn late_follow_up_returns_the_committed_value_and_still_runs() {
        let state = AppState::new(config(), TokenVerifier::new("s").unwrap());
        let finished = Arc::new(AtomicU32::new(0));

        let marker = finished.clone();
        let outcome = state
            .run_host_transition("q1", || async move {
                Ok(Transition::Committed {
                    committed: "committed",
                    follow_up: Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        marker.store(1, Ordering::SeqCst);
                        "completed"
                    }),
                })
            })
            .await;
        assert_eq!(outcome.unwrap(), "committed");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(state.active_host_gates(), 0);
    }

    #[tokio::test]
    async fn prompt_follow_up_yields_the_final_value() {
        let state = AppState::new(config(), TokenVerifier::new("s").unwrap());
        let outcome = state
            .run_host_transition("q1", || async {
                Ok(Transition::Committed {
                    committed: 1,
                    follow_up: Box::pin(async { 2 }),
                })
            })
            .await;
        assert_eq!(outcome.unwrap(), 2);
    }
}
