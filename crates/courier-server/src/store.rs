//! Shared access to the read-only store connection from async code.

use std::sync::{Arc, Mutex};

use courier_store::{Database, StoreError};

use crate::error::ServerError;

/// The single store connection, used only from blocking tasks.
#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
}

impl StoreHandle {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?;
        Ok(result?)
    }
}
