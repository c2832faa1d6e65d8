//! Lazily established, shared store connection.
//!
//! The first caller of [`ConnectionManager::connect`] starts the login and
//! parks the in-flight future in a slot; concurrent callers await the same
//! future, so there is at most one authentication round-trip at a time.
//! A failed connect clears its own slot, and a failure nobody cleared is
//! never handed out again. [`ConnectionManager::disconnect`] empties the
//! slot, and a connect still in flight from before it is never handed to
//! later callers.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use dbdb_core::error::Result;
use dbdb_core::store::{DocumentStore, Transport};

use crate::config::Config;

type StoreFuture = Shared<BoxFuture<'static, Result<Arc<dyn DocumentStore>>>>;

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<StoreFuture>,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: Config,
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Return the shared store handle, establishing it if needed.
    pub async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let (generation, pending) = {
            let mut slot = self.slot.lock().await;
            // A settled failure left behind by a caller that never cleared it.
            let reusable = slot
                .pending
                .as_ref()
                .filter(|pending| !matches!(pending.peek(), Some(Err(_))))
                .cloned();
            match reusable {
                Some(pending) => (slot.generation, pending),
                None => {
                    slot.generation += 1;
                    debug!(db = %self.config.db, generation = slot.generation, "connecting");
                    let pending = self.open().boxed().shared();
                    slot.pending = Some(pending.clone());
                    (slot.generation, pending)
                }
            }
        };

        let result = pending.await;
        if let Err(err) = &result {
            let mut slot = self.slot.lock().await;
            if slot.generation == generation && slot.pending.is_some() {
                debug!(db = %self.config.db, generation, error = %err, "connect failed");
                slot.pending = None;
            }
        }
        result
    }

    /// Drop the cached connection. The next call reconnects from scratch.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        if slot.pending.take().is_some() {
            debug!(db = %self.config.db, generation = slot.generation, "disconnected");
        }
    }

    fn open(&self) -> impl Future<Output = Result<Arc<dyn DocumentStore>>> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        async move {
            let session = match config.credentials() {
                Some((key, password)) => Some(transport.authenticate(key, password).await?),
                None => None,
            };
            debug!(db = %config.db, authenticated = session.is_some(), "connected");
            Ok(transport.open(&config.db, session))
        }
    }
}
