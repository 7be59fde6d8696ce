//! 缓存键生成
//!
//! 键格式：`{prefix}:{entity}:{base64url(params | selected_meta)}`
//!
//! 序列化不做字段排序：字段插入顺序不同的两个逻辑等价请求会得到不同的键。
//! 这只影响命中率，不影响正确性；已有的键可能被直接按原始值排查，因此保持现状。

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use tessera_common::{META_BRANCH_ID, META_ORG_ID, RequestContext};
use tessera_errors::AppResult;

use crate::CacheError;

/// params 与 meta 序列化结果之间的分隔符
pub const KEY_SEPARATOR: char = '|';

/// 默认参与键计算的元数据：租户与分支机构
pub const DEFAULT_META_KEYS: &[&str] = &[META_ORG_ID, META_BRANCH_ID];

/// 命名空间各段不允许出现的字符：层级分隔符与 glob 元字符
const RESERVED_SEGMENT_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// 缓存命名空间 `{tag}:{entity_type}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    tag: String,
    entity_type: String,
}

impl Namespace {
    pub fn new(tag: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            entity_type: entity_type.into(),
        }
    }

    /// 校验 tag 与 entity_type 均为不含 `:` 和 glob 元字符的非空字面量
    pub fn try_new(tag: impl Into<String>, entity_type: impl Into<String>) -> Result<Self, CacheError> {
        let namespace = Self::new(tag, entity_type);
        for segment in [&namespace.tag, &namespace.entity_type] {
            if segment.is_empty() || segment.contains(RESERVED_SEGMENT_CHARS) {
                return Err(CacheError::InvalidNamespace(namespace.prefix()));
            }
        }
        Ok(namespace)
    }

    /// 部署环境 / 租户标签
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn prefix(&self) -> String {
        format!("{}:{}", self.tag, self.entity_type)
    }

    /// 覆盖整个命名空间的清除模式
    pub fn pattern(&self) -> String {
        format!("{}:*", self.prefix())
    }

    /// 键是否属于本命名空间
    pub fn contains(&self, key: &str) -> bool {
        key.strip_prefix(self.tag.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|rest| rest.strip_prefix(self.entity_type.as_str()))
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

/// 缓存键编解码器
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    entity_name: String,
}

impl CacheKeyCodec {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// 生成缓存键
    ///
    /// `include_meta_keys` 中不存在于 `context.meta` 的键被省略而不是补空值，
    /// 因此"有无某个元数据"本身也会改变键。
    pub fn generate_key(
        &self,
        context: &RequestContext,
        prefix: &str,
        include_meta_keys: &[&str],
    ) -> AppResult<String> {
        let params = match &context.params {
            Some(params) => serde_json::to_string(params),
            None => serde_json::to_string(&Value::Object(Map::new())),
        }
        .map_err(CacheError::from)?;

        let meta: Map<String, Value> = include_meta_keys
            .iter()
            .filter_map(|key| {
                context
                    .meta
                    .get(*key)
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect();
        let meta = serde_json::to_string(&meta).map_err(CacheError::from)?;

        let canonical = format!("{}{}{}", params, KEY_SEPARATOR, meta);
        let encoded = URL_SAFE_NO_PAD.encode(canonical.as_bytes());

        Ok(format!("{}:{}:{}", prefix, self.entity_name, encoded))
    }

    /// 解码键的载荷部分，便于排查
    pub fn decode_payload(key: &str) -> Option<String> {
        let payload = key.rsplit(':').next()?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        String::from_utf8(bytes).ok()
    }
}
