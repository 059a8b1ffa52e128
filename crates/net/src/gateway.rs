//! Async access to the synchronous store
//!
//! Store calls run on the blocking pool under a deadline. A call that
//! misses the deadline reports `Timeout`, and callers never broadcast
//! after an error. The blocking call itself cannot be cancelled, so a
//! timed-out write may still land; clients converge on their next fetch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use taskdeck_core::Storage;

use crate::error::{Error, Result};

/// Default deadline for one store call
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Gateway<S> {
    store: Arc<Mutex<S>>,
    timeout: Duration,
}

impl<S> Clone for Gateway<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: Storage + Send + 'static> Gateway<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` against the store on the blocking pool
    pub async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> taskdeck_core::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|_| Error::Unavailable(format!("{}: store lock poisoned", op)))?;
            f(&guard).map_err(Error::from)
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    debug!(op, error = %e, "Store call failed");
                }
                result
            }
            Ok(Err(join_error)) => {
                warn!(op, error = %join_error, "Store call panicked");
                Err(Error::Unavailable(format!("{}: store call aborted", op)))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Store call timed out");
                Err(Error::Timeout(op.to_string()))
            }
        }
    }
}
