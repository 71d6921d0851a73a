//! Redis backend: the queue is a list, wake-ups go over pub/sub.

use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info};

use super::{QueueBackend, Subscription};
use crate::{error::QueueError, queue::WAKE_PAYLOAD};

#[derive(Clone)]
pub struct RedisBackend {
  client: redis::Client,
  conn: MultiplexedConnection,
}

impl RedisBackend {
  /// Connect and verify the server answers.
  ///
  /// `url` must already be in client form (see `RedisConfig::connection_url`).
  pub async fn connect(url: &str) -> Result<Self, QueueError> {
    let client = redis::Client::open(url)?;
    let conn = client.get_multiplexed_async_connection().await?;
    let backend = Self { client, conn };
    backend.ping().await?;

    info!("Connected to redis");
    Ok(backend)
  }
}

#[async_trait]
impl QueueBackend for RedisBackend {
  fn kind(&self) -> &'static str {
    "redis"
  }

  async fn append(&self, key: &str, items: &[String], topic: &str) -> Result<(), QueueError> {
    let mut conn = self.conn.clone();
    let _: () = redis::pipe()
      .atomic()
      .rpush(key, items.to_vec())
      .ignore()
      .publish(topic, WAKE_PAYLOAD)
      .ignore()
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn pop_front(&self, key: &str) -> Result<Option<String>, QueueError> {
    let mut conn = self.conn.clone();
    let item: Option<String> = conn.lpop(key, None).await?;
    Ok(item)
  }

  async fn push_front(&self, key: &str, item: String) -> Result<(), QueueError> {
    let mut conn = self.conn.clone();
    let _: () = conn.lpush(key, item).await?;
    Ok(())
  }

  async fn length(&self, key: &str) -> Result<i64, QueueError> {
    let mut conn = self.conn.clone();
    let len: i64 = conn.llen(key).await?;
    Ok(len)
  }

  async fn publish(&self, topic: &str, payload: &str) -> Result<(), QueueError> {
    let mut conn = self.conn.clone();
    let _: () = conn.publish(topic, payload).await?;
    Ok(())
  }

  async fn subscribe(&self, topic: &str) -> Result<Subscription, QueueError> {
    let mut pubsub = self.client.get_async_pubsub().await?;
    pubsub.subscribe(topic).await?;
    debug!(topic, "Subscribed");

    let stream = pubsub
      .into_on_message()
      .map(|msg| msg.get_payload::<String>().map_err(QueueError::from));
    Ok(stream.boxed())
  }

  async fn ping(&self) -> Result<(), QueueError> {
    let mut conn = self.conn.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }
}
