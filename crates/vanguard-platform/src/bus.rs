use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::debug;

/// Channel carrying visit completion events to the payroll/commission
/// collaborator.
pub const VISITS_COMPLETED_CHANNEL: &str = "visits.completed";

/// Thin pub/sub handle. The engine only publishes; nothing in this core
/// subscribes.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        debug!(channel, receivers, "published event");
        Ok(())
    }
}
