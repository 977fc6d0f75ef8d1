use std::{sync::Arc, time::Duration};

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::{sync::RwLock, time::sleep};
use tracing::info;

use super::error::{MongoDaoError, Result};

const DEFAULT_DB: &str = "live_arena";

/// Backoff applied while the first ping of a fresh client keeps failing.
struct PingRetry;

impl PingRetry {
    const MAX_ATTEMPTS: u32 = 10;
    const INITIAL_DELAY: Duration = Duration::from_millis(250);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(Self::MAX_DELAY)
    }
}

/// MongoDB client handle whose underlying connection can be swapped by
/// [`MongoManager::reconnect`] without invalidating clones.
#[derive(Clone)]
pub struct MongoManager {
    database: Arc<RwLock<Database>>,
    options: Arc<ClientOptions>,
    database_name: Arc<str>,
}

/// Parse `uri`, connect and wait for the first successful ping.
pub async fn connect(uri: &str, db_name: Option<&str>) -> Result<MongoManager> {
    let options = ClientOptions::parse(uri)
        .await
        .map_err(|source| MongoDaoError::InvalidUri {
            uri: uri.to_owned(),
            source,
        })?;
    let database_name = db_name.unwrap_or(DEFAULT_DB);
    let database = open_database(&options, database_name).await?;
    info!(database = database_name, "connected to MongoDB");

    Ok(MongoManager {
        database: Arc::new(RwLock::new(database)),
        options: Arc::new(options),
        database_name: Arc::from(database_name),
    })
}

impl MongoManager {
    /// Clone the current database handle.
    pub async fn database(&self) -> Database {
        self.database.read().await.clone()
    }

    /// Issue a ping against the current connection.
    pub async fn ping(&self) -> Result<()> {
        self.database()
            .await
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    /// Replace the current client with a freshly connected one.
    pub async fn reconnect(&self) -> Result<()> {
        let database = open_database(&self.options, &self.database_name).await?;
        *self.database.write().await = database;
        info!(database = %self.database_name, "MongoDB connection re-established");
        Ok(())
    }
}

async fn open_database(options: &ClientOptions, database_name: &str) -> Result<Database> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempts = 0;
    let mut delay = PingRetry::INITIAL_DELAY;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(database),
            Err(source) => {
                attempts += 1;
                if attempts >= PingRetry::MAX_ATTEMPTS {
                    return Err(MongoDaoError::InitialPing { attempts, source });
                }
                sleep(delay).await;
                delay = PingRetry::next_delay(delay);
            }
        }
    }
}
