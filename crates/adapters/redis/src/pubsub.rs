//! 失效事件的 Redis Pub/Sub 传输
//!
//! 发布：`PUBLISH cache.clean.{entity_type} ""`
//! 订阅：`PSUBSCRIBE cache.clean.*`，解析频道名后转发到进程内事件总线

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tessera_cache_core::LocalEventBus;
use tessera_errors::{AppError, AppResult};
use tessera_ports::{INVALIDATION_CHANNEL_PREFIX, InvalidationEvent, InvalidationPublisher};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 订阅断开后重新订阅前的等待
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// 订阅所有失效频道的模式
pub fn invalidation_pattern() -> String {
    format!("{}*", INVALIDATION_CHANNEL_PREFIX)
}

/// Redis 失效事件发布者
#[derive(Clone)]
pub struct RedisInvalidationPublisher {
    conn: ConnectionManager,
}

impl RedisInvalidationPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl InvalidationPublisher for RedisInvalidationPublisher {
    async fn publish(&self, event: &InvalidationEvent) -> AppResult<()> {
        let channel = event.channel();
        let mut conn = self.conn.clone();
        let subscribers: u64 = conn
            .publish(&channel, "")
            .await
            .map_err(|e| AppError::cache(format!("Failed to publish message: {}", e)))?;

        debug!(channel = %channel, subscribers, "Invalidation event published");
        Ok(())
    }
}

/// Redis 失效事件订阅者
pub struct RedisInvalidationSubscriber {
    client: Client,
}

impl RedisInvalidationSubscriber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 订阅并转发，直到订阅连接断开
    pub async fn run(&self, bus: &LocalEventBus) -> AppResult<()> {
        let pattern = invalidation_pattern();

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::cache(format!("Failed to get pubsub connection: {}", e)))?;

        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| AppError::cache(format!("Failed to psubscribe to {}: {}", pattern, e)))?;

        info!(pattern = %pattern, "Subscribed to invalidation events");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name();
            match InvalidationEvent::from_channel(channel) {
                Some(event) => {
                    bus.forward(event);
                }
                None => warn!(channel = %channel, "Ignoring message on unexpected channel"),
            }
        }

        Ok(())
    }

    /// 后台持续订阅；连接断开后重新订阅
    pub fn spawn(self, bus: LocalEventBus) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.run(&bus).await {
                    Ok(()) => warn!("Invalidation subscription ended, resubscribing"),
                    Err(e) => error!(error = %e, "Invalidation subscription failed, resubscribing"),
                }
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        })
    }
}
