//! Redis/Valkey adapter for the state store.
//!
//! Records are plain string keys (`GET`/`SET`), wake events go over
//! Redis pub/sub. Commands share a deadpool connection pool; each
//! subscription holds its own dedicated pub/sub connection.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use wakegate_core::{KeyLayout, WorkloadKey};

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, Subscription, SUBSCRIPTION_BUFFER};
use crate::types::LifecycleState;

fn unavailable(e: impl std::fmt::Display) -> StateError {
    StateError::Unavailable(e.to_string())
}

/// Redis-backed state store, shared across controller replicas.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
    layout: KeyLayout,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(
        url: &str,
        pool_size: usize,
        op_timeout: Duration,
        layout: KeyLayout,
    ) -> StateResult<Self> {
        let pool = Config::from_url(url)
            .builder()
            .map_err(|e| StateError::Open(e.to_string()))?
            .max_size(pool_size)
            .wait_timeout(Some(op_timeout))
            .create_timeout(Some(op_timeout))
            .recycle_timeout(Some(op_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StateError::Open(e.to_string()))?;
        let client = redis::Client::open(url).map_err(|e| StateError::Open(e.to_string()))?;

        let store = Self {
            pool,
            client,
            layout,
            op_timeout,
        };
        store
            .bounded("PING", async {
                let mut conn = store.pool.get().await.map_err(unavailable)?;
                redis::cmd("PING")
                    .query_async::<String>(&mut *conn)
                    .await
                    .map_err(unavailable)
            })
            .await?;

        debug!(pool_size, op_timeout_ms = op_timeout.as_millis() as u64, "redis state store connected");
        Ok(store)
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StateResult<T>>,
    ) -> StateResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StateError::Unavailable(format!(
                "{op} timed out after {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }
}

/// Decode a raw record into a lifecycle state.
pub(crate) fn decode_record(
    record_key: String,
    raw: Option<String>,
) -> StateResult<Option<LifecycleState>> {
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

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &WorkloadKey) -> StateResult<Option<LifecycleState>> {
        let record_key = self.layout.record_key(key);
        let raw: Option<String> = self
            .bounded("GET", async {
                let mut conn = self.pool.get().await.map_err(unavailable)?;
                conn.get(&record_key).await.map_err(unavailable)
            })
            .await?;
        decode_record(record_key, raw)
    }

    async fn set(&self, key: &WorkloadKey, state: LifecycleState) -> StateResult<()> {
        let record_key = self.layout.record_key(key);
        self.bounded("SET", async {
            let mut conn = self.pool.get().await.map_err(unavailable)?;
            conn.set::<_, _, ()>(&record_key, state.as_str())
                .await
                .map_err(unavailable)
        })
        .await?;
        debug!(key = %record_key, %state, "lifecycle record stored");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> StateResult<()> {
        let receivers: i64 = self
            .bounded("PUBLISH", async {
                let mut conn = self.pool.get().await.map_err(unavailable)?;
                conn.publish(topic, payload).await.map_err(unavailable)
            })
            .await?;
        debug!(%topic, %payload, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StateResult<Subscription> {
        let pubsub = self
            .bounded("SUBSCRIBE", async {
                let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
                pubsub.subscribe(topic).await.map_err(unavailable)?;
                Ok::<_, StateError>(pubsub)
            })
            .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic_name = topic.to_string();

        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(topic = %topic_name, error = %e, "undecodable pub/sub payload");
                    }
                }
            }
            warn!(topic = %topic_name, "redis pub/sub connection closed");
        });

        debug!(%topic, "subscribed");
        Ok(Subscription::new(topic, rx, forwarder))
    }

    fn layout(&self) -> &KeyLayout {
        &self.layout
    }
}
