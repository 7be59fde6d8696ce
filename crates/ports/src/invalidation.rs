//! 缓存失效事件

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_errors::AppResult;

/// 失效事件频道前缀
pub const INVALIDATION_CHANNEL_PREFIX: &str = "cache.clean.";

/// 缓存失效事件
///
/// 只标识需要整体清除的实体命名空间，不携带其它负载
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub entity_type: String,
}

impl InvalidationEvent {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
        }
    }

    /// 事件名 `cache.clean.{entity_type}`
    pub fn channel(&self) -> String {
        format!("{}{}", INVALIDATION_CHANNEL_PREFIX, self.entity_type)
    }

    /// 从事件名解析；前缀不符或实体类型为空时返回 None
    pub fn from_channel(channel: &str) -> Option<Self> {
        channel
            .strip_prefix(INVALIDATION_CHANNEL_PREFIX)
            .filter(|entity_type| !entity_type.is_empty())
            .map(Self::new)
    }
}

/// 失效事件发布者
///
/// 投递语义为至少一次，消费方必须容忍重复事件
#[async_trait]
pub trait InvalidationPublisher: Send + Sync {
    async fn publish(&self, event: &InvalidationEvent) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        let event = InvalidationEvent::new("product");
        assert_eq!(event.channel(), "cache.clean.product");
        assert_eq!(
            InvalidationEvent::from_channel("cache.clean.product"),
            Some(event)
        );
    }

    #[test]
    fn test_foreign_channels_are_ignored() {
        assert_eq!(InvalidationEvent::from_channel("cache.clean."), None);
        assert_eq!(InvalidationEvent::from_channel("orders.created"), None);
    }

    #[test]
    fn test_event_has_no_extra_payload() {
        let json = serde_json::to_string(&InvalidationEvent::new("branch")).unwrap();
        assert_eq!(json, r#"{"entity_type":"branch"}"#);
    }
}
