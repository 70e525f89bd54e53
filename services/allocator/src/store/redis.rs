//! Redis-backed store.
//!
//! One connection manager is built at startup and cloned per call; it
//! reconnects internally, so the rest of the service never handles
//! connection lifecycle. Subscriptions each get a dedicated pub/sub
//! connection, as required by the Redis protocol.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Store, StoreError, Subscription};

/// Buffer between the pub/sub pump task and a subscriber.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Store implementation over a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the store. Fails fast so startup can abort with a clear
    /// error instead of limping along without persistence.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::Connect)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(StoreError::Connect)?;
        debug!(url = %url, "Store connection established");
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.hget(key, field).await.map_err(StoreError::Command)?;
        Ok(value)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.manager.clone();
        let entries: HashMap<String, String> =
            conn.hgetall(key).await.map_err(StoreError::Command)?;
        Ok(entries)
    }

    async fn hash_del(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let removed: u64 = conn
            .hdel(key, fields.to_vec())
            .await
            .map_err(StoreError::Command)?;
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(StoreError::Command)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(StoreError::Connect)?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(StoreError::Command)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Dropping undecodable message");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Subscriber dropped; end the pump.
                    break;
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
