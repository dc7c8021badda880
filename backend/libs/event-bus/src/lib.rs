//! Transport half of the Subscription Consumer (C4): a thin wrapper over
//! the pub/sub bus. Owns nothing but the channel handle; all dispatch,
//! pooling and shutdown discipline lives in the `ingest-consumer` binary
//! that uses this crate.

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

/// A single-owner subscription to one channel. The bus is fire-and-forget:
/// there is no redelivery and no acknowledgement protocol.
pub struct Subscriber {
    pubsub: redis::aio::PubSub,
    channel: String,
}

impl Subscriber {
    /// Subscribe to `channel` on the bus at `redis_url`.
    pub async fn subscribe(redis_url: &str, channel: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("failed to open Redis pub/sub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("failed to subscribe to channel {channel}"))?;
        info!(channel, "subscribed to channel");
        Ok(Self {
            pubsub,
            channel: channel.to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Consume this subscriber into a stream of raw message payloads.
    /// Single-owner: the receive loop is the only reader of this stream.
    pub fn into_message_stream(self) -> impl Stream<Item = String> {
        self.pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() })
    }
}

/// Publish-side handle, used by the HTTP façade's `/publish` route and by
/// the load-test publisher. Never used by the core dedup path itself — the
/// façade republishes to the bus, it never writes to the store directly.
#[derive(Clone)]
pub struct Publisher {
    manager: ConnectionManager,
}

impl Publisher {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        Ok(Self { manager })
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await
            .context("failed to publish message")?;
        debug!(channel, bytes = message.len(), "published message");
        Ok(())
    }

    /// Idiomatic liveness probe via the driver's own PING, not a raw
    /// hand-rolled protocol frame.
    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}
