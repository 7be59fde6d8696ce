//! 全网格缓存失效
//!
//! 发布端：实体变更时发出 `cache.clean.{entity_type}`。
//! 消费端：任一实例收到事件后整体清除 `{tag}:{entity_type}:*`。
//! 投递为至少一次，重复事件只会多做一次空扫描。

use std::sync::Arc;

use async_trait::async_trait;
use tessera_errors::AppResult;
use tessera_ports::{InvalidationEvent, InvalidationPublisher};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BulkEvictor, Namespace, stats};

/// 进程内事件总线
///
/// 单机部署时直接作为发布者；多实例部署时由 Redis 订阅端把远端事件转发进来。
#[derive(Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    /// 投递到本地订阅者，返回接收者数量
    pub fn forward(&self, event: InvalidationEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(channel = %event.channel(), "No local invalidation listeners");
                0
            }
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationPublisher for LocalEventBus {
    async fn publish(&self, event: &InvalidationEvent) -> AppResult<()> {
        self.forward(event.clone());
        Ok(())
    }
}

/// 失效广播发布端
#[derive(Clone)]
pub struct InvalidationBroadcaster {
    publisher: Arc<dyn InvalidationPublisher>,
}

impl InvalidationBroadcaster {
    pub fn new(publisher: Arc<dyn InvalidationPublisher>) -> Self {
        Self { publisher }
    }

    /// 广播实体命名空间失效
    pub async fn broadcast(&self, entity_type: &str) -> AppResult<()> {
        let event = InvalidationEvent::new(entity_type);
        self.publisher.publish(&event).await?;
        stats::record_invalidation(entity_type);
        debug!(channel = %event.channel(), "Invalidation event emitted");
        Ok(())
    }
}

/// 失效事件消费端
pub struct InvalidationListener {
    namespace_tag: String,
    evictor: BulkEvictor,
}

impl InvalidationListener {
    pub fn new(namespace_tag: impl Into<String>, evictor: BulkEvictor) -> Self {
        Self {
            namespace_tag: namespace_tag.into(),
            evictor,
        }
    }

    /// 处理单个事件，返回清除的键数
    pub async fn handle(&self, event: &InvalidationEvent) -> AppResult<u64> {
        let namespace = Namespace::new(&self.namespace_tag, &event.entity_type);
        self.evictor.evict_namespace(&namespace).await
    }

    /// 持续消费本地总线，直到总线关闭
    pub fn spawn(self: Arc<Self>, mut receiver: broadcast::Receiver<InvalidationEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(namespace = %self.namespace_tag, "Invalidation listener started");

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.handle(&event).await {
                            error!(channel = %event.channel(), error = %e, "Failed to handle invalidation event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Invalidation listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            info!(namespace = %self.namespace_tag, "Invalidation listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCache;
    use std::time::Duration;
    use tessera_ports::CachePort;

    async fn wait_until_empty(cache: &InMemoryCache, pattern: &str) {
        for _ in 0..100 {
            if cache.keys_matching(pattern).is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("keys matching {} were not evicted", pattern);
    }

    #[tokio::test]
    async fn test_listener_evicts_only_event_namespace() {
        let cache = InMemoryCache::new();
        cache.set("prod:product:a", "1", None).await.unwrap();
        cache.set("prod:product:b", "1", None).await.unwrap();
        cache.set("prod:order:a", "1", None).await.unwrap();

        let listener = InvalidationListener::new("prod", BulkEvictor::new(Arc::new(cache.clone())));
        let removed = listener
            .handle(&InvalidationEvent::new("product"))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(cache.exists("prod:order:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_instance() {
        let bus = LocalEventBus::new(16);
        let cache = InMemoryCache::new();

        // 两个实例共享同一个存储，各自订阅
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let listener = Arc::new(InvalidationListener::new(
                    "prod",
                    BulkEvictor::new(Arc::new(cache.clone())),
                ));
                listener.spawn(bus.subscribe())
            })
            .collect();

        cache.set("prod:product:a", "1", None).await.unwrap();
        let broadcaster = InvalidationBroadcaster::new(Arc::new(bus.clone()));
        broadcaster.broadcast("product").await.unwrap();

        wait_until_empty(&cache, "prod:product:*").await;

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_duplicate_events_are_harmless() {
        let cache = InMemoryCache::new();
        cache.set("prod:product:a", "1", None).await.unwrap();
        let listener = InvalidationListener::new("prod", BulkEvictor::new(Arc::new(cache.clone())));
        let event = InvalidationEvent::new("product");

        assert_eq!(listener.handle(&event).await.unwrap(), 1);
        assert_eq!(listener.handle(&event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listener_stops_when_bus_closes() {
        let bus = LocalEventBus::new(4);
        let listener = Arc::new(InvalidationListener::new(
            "prod",
            BulkEvictor::new(Arc::new(InMemoryCache::new())),
        ));
        let handle = listener.spawn(bus.subscribe());

        drop(bus);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should exit after the bus is dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_listeners_is_ok() {
        let bus = LocalEventBus::new(4);
        assert_eq!(bus.forward(InvalidationEvent::new("product")), 0);
        assert!(bus.publish(&InvalidationEvent::new("product")).await.is_ok());
    }
}
