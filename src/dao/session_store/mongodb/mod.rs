mod error;
mod manager;
mod store;

pub use error::MongoDaoError;
pub use manager::{MongoManager, connect};
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
