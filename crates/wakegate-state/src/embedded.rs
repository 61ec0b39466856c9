//! redb-backed lifecycle records with an in-process pub/sub bus.
//!
//! Suitable when the gateway and the scaler share one process. Records
//! persist in a redb file (or an in-memory backend for tests); publish
//! and subscribe go through per-topic `tokio::sync::broadcast` channels,
//! so nothing published is seen by another process.
//!
//! redb transactions are synchronous; the async API runs them on the
//! blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use wakegate_core::{KeyLayout, WorkloadKey};

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, Subscription, SUBSCRIPTION_BUFFER};
use crate::tables::LIFECYCLE;
use crate::types::LifecycleState;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of each topic's broadcast ring.
const TOPIC_CAPACITY: usize = 1024;

/// Thread-safe embedded state store.
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    layout: KeyLayout,
}

impl EmbeddedStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, layout: KeyLayout) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db, layout);
        store.ensure_tables()?;
        debug!(?path, "embedded state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory(layout: KeyLayout) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db, layout);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database, layout: KeyLayout) -> Self {
        Self {
            db: Arc::new(db),
            topics: Arc::new(Mutex::new(HashMap::new())),
            layout,
        }
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(LIFECYCLE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_raw(&self, record_key: &str) -> StateResult<Option<String>> {
        read_record(&self.db, record_key)
    }

    /// Store an arbitrary raw value, bypassing the state codec.
    ///
    /// Lets operators and tests reproduce records written by other tools.
    pub fn put_raw(&self, key: &WorkloadKey, value: &str) -> StateResult<()> {
        write_record(&self.db, &self.layout.record_key(key), value)
    }

    /// Run a redb transaction on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> StateResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StateResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(map_err!(Transaction))?
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

fn read_record(db: &Database, record_key: &str) -> StateResult<Option<String>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(LIFECYCLE).map_err(map_err!(Table))?;
    let value = table
        .get(record_key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_string());
    Ok(value)
}

fn write_record(db: &Database, record_key: &str, value: &str) -> StateResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    {
        let mut table = txn.open_table(LIFECYCLE).map_err(map_err!(Table))?;
        table.insert(record_key, value).map_err(map_err!(Write))?;
    }
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

#[async_trait]
impl StateStore for EmbeddedStore {
    async fn get(&self, key: &WorkloadKey) -> StateResult<Option<LifecycleState>> {
        let record_key = self.layout.record_key(key);
        let lookup = record_key.clone();
        let raw = self.blocking(move |db| read_record(db, &lookup)).await?;
        match raw {
            Some(value) => value
                .parse::<LifecycleState>()
                .map(Some)
                .map_err(|e| StateError::InvalidValue {
                    key: record_key,
                    value: e.0,
                }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &WorkloadKey, state: LifecycleState) -> StateResult<()> {
        let record_key = self.layout.record_key(key);
        let target = record_key.clone();
        self.blocking(move |db| write_record(db, &target, state.as_str()))
            .await?;
        debug!(key = %record_key, %state, "lifecycle record stored");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> StateResult<()> {
        // No subscribers is not an error: the message is simply dropped.
        let receivers = self.sender(topic).send(payload.to_string()).unwrap_or(0);
        debug!(%topic, %payload, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StateResult<Subscription> {
        let mut source = self.sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic_name = topic.to_string();

        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic_name, skipped, "subscriber lagged, payloads dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(%topic, "subscribed");
        Ok(Subscription::new(topic, rx, forwarder))
    }

    fn layout(&self) -> &KeyLayout {
        &self.layout
    }
}
