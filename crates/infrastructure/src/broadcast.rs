//! 跨实例广播
//!
//! 每个实例把广播发布到共享的 Redis 频道，同时订阅该频道并把收到的
//! 事件投递给本地订阅者。会话只归属一个实例，发送方排除依靠全局唯一的会话标识。

use std::time::Duration;

use application::{
    Broadcast, BroadcastError, EventBroadcaster, EventStream, LocalEventBroadcaster,
};
use async_trait::async_trait;
use domain::SessionId;
use futures_util::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::task::JoinHandle;

use crate::retry::Backoff;

pub struct RedisEventBroadcaster {
    publisher: ConnectionManager,
    channel: String,
    local: LocalEventBroadcaster,
    relay: JoinHandle<()>,
}

impl RedisEventBroadcaster {
    /// 先完成首次订阅再返回，保证之后发布的事件都能被本实例收到
    pub async fn connect(
        client: Client,
        channel: impl Into<String>,
        local: LocalEventBroadcaster,
    ) -> Result<Self, redis::RedisError> {
        let channel = channel.into();
        let publisher = ConnectionManager::new(client.clone()).await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        tracing::info!(%channel, "subscribed to broadcast channel");

        let relay = tokio::spawn(relay_loop(client, channel.clone(), local.clone(), pubsub));

        Ok(Self {
            publisher,
            channel,
            local,
            relay,
        })
    }
}

impl Drop for RedisEventBroadcaster {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

async fn relay_loop(
    client: Client,
    channel: String,
    local: LocalEventBroadcaster,
    mut pubsub: redis::aio::PubSub,
) {
    let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(5));
    loop {
        forward(&mut pubsub, &local).await;
        tracing::warn!(%channel, "broadcast subscription lost, reconnecting");

        let mut attempt = 0u32;
        pubsub = loop {
            attempt += 1;
            tokio::time::sleep(backoff.delay_at(attempt)).await;
            match resubscribe(&client, &channel).await {
                Ok(pubsub) => break pubsub,
                Err(err) => {
                    tracing::error!(%channel, attempt, error = %err, "failed to resubscribe");
                }
            }
        };
        tracing::info!(%channel, attempt, "broadcast subscription restored");
    }
}

async fn resubscribe(client: &Client, channel: &str) -> Result<redis::aio::PubSub, redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

async fn forward(pubsub: &mut redis::aio::PubSub, local: &LocalEventBroadcaster) {
    let mut messages = std::pin::pin!(pubsub.on_message());
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable broadcast payload");
                continue;
            }
        };
        match serde_json::from_str::<Broadcast>(&payload) {
            Ok(broadcast) => {
                if let Err(err) = local.deliver(broadcast) {
                    tracing::warn!(error = %err, "local delivery failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "malformed broadcast payload"),
        }
    }
}

#[async_trait]
impl EventBroadcaster for RedisEventBroadcaster {
    async fn broadcast(&self, payload: Broadcast) -> Result<(), BroadcastError> {
        let encoded =
            serde_json::to_string(&payload).map_err(|err| BroadcastError::failed(err.to_string()))?;
        let mut conn = self.publisher.clone();
        let published: Result<i64, _> = conn.publish(&self.channel, encoded).await;
        if let Err(err) = published {
            // 发布失败时至少送达本实例的会话
            tracing::warn!(channel = %self.channel, error = %err, "publish failed, delivering locally");
            self.local.deliver(payload)?;
        }
        Ok(())
    }

    fn subscribe(&self, session: SessionId) -> EventStream {
        self.local.subscribe(session)
    }
}
