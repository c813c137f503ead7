use std::sync::Arc;

use application::{
    EventBroadcaster, EventLogStore, LocalEventBroadcaster, MemoryEventLogStore,
    MemoryPresenceRegistry, MemoryTypingRegistry, PresenceRegistry, TypingRegistry,
};
use config::{AppConfig, BroadcastBackend, PresenceBackend, StorageBackend};
use redis::{aio::ConnectionManager, Client};
use thiserror::Error;

use crate::{
    broadcast::RedisEventBroadcaster,
    event_log::{create_pg_pool, PgEventLogStore},
    migrations::MIGRATOR,
    presence::RedisPresenceRegistry,
    retry::{retry_async, RetryConfig},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 按配置装配好的外部协作方
#[derive(Clone)]
pub struct Infrastructure {
    pub registry: Arc<dyn PresenceRegistry>,
    pub typing: Arc<dyn TypingRegistry>,
    pub event_log: Arc<dyn EventLogStore>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let retry = RetryConfig::default();

        let event_log: Arc<dyn EventLogStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryEventLogStore::new()),
            StorageBackend::Postgres => {
                let storage = &config.storage;
                let pool = retry_async("postgres", &retry, || {
                    create_pg_pool(&storage.database_url, storage.max_connections)
                })
                .await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("event log backed by postgres");
                Arc::new(PgEventLogStore::new(pool))
            }
        };

        let (registry, typing): (Arc<dyn PresenceRegistry>, Arc<dyn TypingRegistry>) =
            match config.presence.backend {
                PresenceBackend::Memory => (
                    Arc::new(MemoryPresenceRegistry::new()),
                    Arc::new(MemoryTypingRegistry::new()),
                ),
                PresenceBackend::Redis => {
                    let presence = &config.presence;
                    let client = Client::open(presence.redis_url.as_str())?;
                    let connection =
                        retry_async("redis", &retry, || ConnectionManager::new(client.clone()))
                            .await?;
                    let registry = RedisPresenceRegistry::start(
                        connection,
                        &presence.key,
                        &presence.typing_key,
                        presence.lease(),
                    )
                    .await?;
                    tracing::info!(key = %presence.key, typing_key = %presence.typing_key, "presence registry backed by redis");
                    let typing = registry.typing();
                    (Arc::new(registry), Arc::new(typing))
                }
            };

        let local = LocalEventBroadcaster::new(config.chat.broadcast_capacity);
        let broadcaster: Arc<dyn EventBroadcaster> = match config.broadcast.backend {
            BroadcastBackend::Local => Arc::new(local),
            BroadcastBackend::Redis => {
                let client = Client::open(config.broadcast.redis_url.as_str())?;
                let broadcaster = retry_async("redis pubsub", &retry, || {
                    RedisEventBroadcaster::connect(
                        client.clone(),
                        config.broadcast.channel.clone(),
                        local.clone(),
                    )
                })
                .await?;
                Arc::new(broadcaster)
            }
        };

        Ok(Self {
            registry,
            typing,
            event_log,
            broadcaster,
        })
    }
}
