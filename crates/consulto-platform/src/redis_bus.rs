use anyhow::{Context, Result};
use async_trait::async_trait;
use consulto_core::{DomainEvent, DomainEventKind, EventPublisher};
use redis::{AsyncCommands, Client, aio::PubSub};
use serde::Serialize;

/// Redis pub/sub transport for domain events.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }

    pub async fn subscribe(&self, kind: DomainEventKind) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(kind.channel()).await?;
        Ok(pubsub)
    }
}

#[async_trait]
impl EventPublisher for RedisBus {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.publish_json(event.kind.channel(), event)
            .await
            .with_context(|| format!("publish to {}", event.kind.channel()))
    }
}
