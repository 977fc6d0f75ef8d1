//! Live Arena Back binary entrypoint wiring REST, SSE and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use live_arena_back::{
    config::AppConfig,
    dao::session_store::{SharedStore, memory::MemorySessionStore},
    routes,
    services::identity::{TOKEN_SECRET_ENV, TokenVerifier},
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let secret = env::var(TOKEN_SECRET_ENV)
        .with_context(|| format!("{TOKEN_SECRET_ENV} must hold the token signing secret"))?;
    let tokens = TokenVerifier::new(secret).context("building token verifier")?;

    let app_state = AppState::new(config, tokens);
    install_store(&app_state).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the backend named by `STORE_BACKEND`. Remote backends are connected
/// by the storage supervisor; the server runs degraded until they answer.
async fn install_store(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
    match backend.as_str() {
        "memory" => {
            let store: SharedStore = Arc::new(MemorySessionStore::new());
            state.set_store(store).await;
            info!("using the in-memory session store");
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use live_arena_back::{
                dao::{session_store::mongodb as mongo_store, storage::StorageError},
                services::storage_supervisor,
            };

            let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
            let db_name = env::var("MONGO_DB").ok();
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let manager = mongo_store::connect(&uri, db_name.as_deref())
                        .await
                        .map_err(StorageError::from)?;
                    Ok(Arc::new(mongo_store::MongoSessionStore::new(manager)) as SharedStore)
                }
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use live_arena_back::{
                dao::{session_store::couchdb, storage::StorageError},
                services::storage_supervisor,
            };

            let config = couchdb::CouchConfig::from_env().context("reading CouchDB settings")?;
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let config = config.clone();
                async move {
                    let store = couchdb::CouchSessionStore::connect(config)
                        .await
                        .map_err(StorageError::from)?;
                    Ok(Arc::new(store) as SharedStore)
                }
            }));
        }
        other => bail!("unsupported STORE_BACKEND `{other}`"),
    }
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
